//! An HTTP GET load.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Error;
use crate::load::Load;
use crate::options::{
    bind_options, describe_options, OptionDescriptor, OptionInfo, OptionKind, OptionValue,
};
use crate::worker::JobOutcome;

/// Issues GET requests against a fixed URL and succeeds when the response
/// carries the expected status code.
pub struct HttpLoad {
    url: String,
    expect_status: u64,
    client: Option<reqwest::Client>,
}

impl Default for HttpLoad {
    fn default() -> Self {
        Self {
            url: String::new(),
            expect_status: 200,
            client: None,
        }
    }
}

const OPTIONS: &[OptionDescriptor<HttpLoad>] = &[
    OptionDescriptor {
        name: "url",
        description: "Target URL for GET requests",
        kind: OptionKind::String,
        set: |load, value| {
            if let OptionValue::String(s) = value {
                load.url = s;
            }
        },
        get: |load| load.url.clone(),
    },
    OptionDescriptor {
        name: "expect_status",
        description: "HTTP status code treated as success",
        kind: OptionKind::Uint,
        set: |load, value| {
            if let OptionValue::Uint(n) = value {
                load.expect_status = n;
            }
        },
        get: |load| load.expect_status.to_string(),
    },
];

#[async_trait]
impl Load for HttpLoad {
    fn options(&self) -> Vec<OptionInfo> {
        describe_options(self, OPTIONS)
    }

    async fn init(&mut self, options: &BTreeMap<String, String>) -> Result<(), Error> {
        bind_options(self, OPTIONS, options)?;
        if self.url.is_empty() {
            return Err(Error::Invalid("url option is required".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|err| Error::Unavailable(format!("building HTTP client: {err}")))?;

        // One probe request up front: an unreachable target should fail the
        // runner's creation, not every job after it.
        client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| Error::Unavailable(format!("probing {}: {err}", self.url)))?;

        self.client = Some(client);
        Ok(())
    }

    async fn job(&self) -> JobOutcome {
        let start = Instant::now();
        let Some(client) = &self.client else {
            return JobOutcome::err(start.elapsed(), "load not initialized");
        };
        match client.get(&self.url).send().await {
            Ok(resp) if u64::from(resp.status().as_u16()) == self.expect_status => {
                JobOutcome::ok(start.elapsed())
            }
            Ok(resp) => JobOutcome::err(
                start.elapsed(),
                format!("unexpected status {}", resp.status()),
            ),
            Err(err) => JobOutcome::err(start.elapsed(), err),
        }
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requires_a_url() {
        let mut load = HttpLoad::default();
        let err = load.init(&BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn unreachable_target_is_unavailable() {
        let mut load = HttpLoad::default();
        let err = load
            .init(&BTreeMap::from([(
                "url".to_string(),
                // port 1 on loopback refuses the connection immediately
                "http://127.0.0.1:1/".to_string(),
            )]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[test]
    fn declares_its_options() {
        let infos = HttpLoad::default().options();
        let names: Vec<&str> = infos.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, ["url", "expect_status"]);
        assert_eq!(infos[1].default, "200");
    }
}
