//! A synthetic load that only consumes time.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;

use crate::error::Error;
use crate::load::Load;
use crate::options::{
    bind_options, describe_options, OptionDescriptor, OptionInfo, OptionKind, OptionValue,
};
use crate::worker::JobOutcome;

/// Sleeps a uniformly distributed time per job and fails a configurable
/// fraction of them. Useful for calibrating pacing settings and as a test
/// double for real loads.
pub struct SleepLoad {
    min_ms: u64,
    max_ms: u64,
    fail_ratio: f64,
}

impl Default for SleepLoad {
    fn default() -> Self {
        Self {
            min_ms: 1,
            max_ms: 5,
            fail_ratio: 0.0,
        }
    }
}

const OPTIONS: &[OptionDescriptor<SleepLoad>] = &[
    OptionDescriptor {
        name: "min_ms",
        description: "Minimum sleep per job, in milliseconds",
        kind: OptionKind::Uint,
        set: |load, value| {
            if let OptionValue::Uint(n) = value {
                load.min_ms = n;
            }
        },
        get: |load| load.min_ms.to_string(),
    },
    OptionDescriptor {
        name: "max_ms",
        description: "Maximum sleep per job, in milliseconds",
        kind: OptionKind::Uint,
        set: |load, value| {
            if let OptionValue::Uint(n) = value {
                load.max_ms = n;
            }
        },
        get: |load| load.max_ms.to_string(),
    },
    OptionDescriptor {
        name: "fail_ratio",
        description: "Fraction of jobs that fail, between 0 and 1",
        kind: OptionKind::Float,
        set: |load, value| {
            if let OptionValue::Float(x) = value {
                load.fail_ratio = x;
            }
        },
        get: |load| load.fail_ratio.to_string(),
    },
];

#[async_trait]
impl Load for SleepLoad {
    fn options(&self) -> Vec<OptionInfo> {
        describe_options(self, OPTIONS)
    }

    async fn init(&mut self, options: &BTreeMap<String, String>) -> Result<(), Error> {
        bind_options(self, OPTIONS, options)?;
        if self.max_ms < self.min_ms {
            return Err(Error::Invalid(format!(
                "max_ms {} is below min_ms {}",
                self.max_ms, self.min_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.fail_ratio) {
            return Err(Error::Invalid(format!(
                "fail_ratio {} is outside [0, 1]",
                self.fail_ratio
            )));
        }
        Ok(())
    }

    async fn job(&self) -> JobOutcome {
        let start = Instant::now();
        let (delay, fail) = {
            let mut rng = rand::thread_rng();
            (
                Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms)),
                rng.gen::<f64>() < self.fail_ratio,
            )
        };
        tokio::time::sleep(delay).await;
        if fail {
            JobOutcome::err(start.elapsed(), "synthetic failure")
        } else {
            JobOutcome::ok(start.elapsed())
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
    async fn init_validates_options() {
        let mut load = SleepLoad::default();
        load.init(&BTreeMap::from([
            ("min_ms".to_string(), "10".to_string()),
            ("max_ms".to_string(), "20".to_string()),
            ("fail_ratio".to_string(), "0.5".to_string()),
        ]))
        .await
        .unwrap();
        assert_eq!(load.min_ms, 10);
        assert_eq!(load.max_ms, 20);
        assert_eq!(load.fail_ratio, 0.5);

        let mut load = SleepLoad::default();
        let err = load
            .init(&BTreeMap::from([
                ("min_ms".to_string(), "20".to_string()),
                ("max_ms".to_string(), "10".to_string()),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        let mut load = SleepLoad::default();
        let err = load
            .init(&BTreeMap::from([(
                "fail_ratio".to_string(),
                "1.5".to_string(),
            )]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn always_failing_load_reports_errors() {
        let mut load = SleepLoad::default();
        load.init(&BTreeMap::from([(
            "fail_ratio".to_string(),
            "1".to_string(),
        )]))
        .await
        .unwrap();

        let outcome = load.job().await;
        assert!(!outcome.success());
        assert!(outcome.elapsed >= Duration::from_millis(1));
    }

    #[test]
    fn declares_its_options() {
        let names: Vec<String> = SleepLoad::default()
            .options()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, ["min_ms", "max_ms", "fail_ratio"]);
    }
}
