use crate::Error;
use governor::Quota;
use relay_consensus::{
    aggregator,
    application::aggregator as aggregation,
    policy,
    processor::{self, DEFAULT_LOCK_SHARDS},
    storage::Repository,
    types::{Limits, VerificationType},
};
use relay_p2p::{dissemination, pool, recovery, PeerId, Peers};
use relay_utils::Backpressure;
use serde::{Deserialize, Serialize};
use std::{num::NonZeroU32, path::Path, time::Duration};

/// What a full queue does, as written in YAML.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackpressureConfig {
    Block { timeout_ms: u64 },
    Drop,
}

impl From<BackpressureConfig> for Backpressure {
    fn from(cfg: BackpressureConfig) -> Self {
        match cfg {
            BackpressureConfig::Block { timeout_ms } => {
                Backpressure::Block(Duration::from_millis(timeout_ms))
            }
            BackpressureConfig::Drop => Backpressure::Drop,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    pub lock_shards: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            lock_shards: DEFAULT_LOCK_SHARDS,
        }
    }
}

/// Settings of the aggregator role. Nodes without this section only sign.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub policy: policy::Config,
    #[serde(default = "default_verification_type")]
    pub verification_type: VerificationType,
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,
    #[serde(default = "default_mailbox_timeout_ms")]
    pub mailbox_timeout_ms: u64,
    #[serde(default = "default_recheck_interval_ms")]
    pub recheck_interval_ms: u64,
    #[serde(default = "default_max_recheck")]
    pub max_recheck: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            policy: policy::Config::default(),
            verification_type: default_verification_type(),
            mailbox_size: default_mailbox_size(),
            mailbox_timeout_ms: default_mailbox_timeout_ms(),
            recheck_interval_ms: default_recheck_interval_ms(),
            max_recheck: default_max_recheck(),
        }
    }
}

fn default_verification_type() -> VerificationType {
    VerificationType::Simple
}

fn default_mailbox_size() -> usize {
    1024
}

fn default_mailbox_timeout_ms() -> u64 {
    1_000
}

fn default_recheck_interval_ms() -> u64 {
    5_000
}

fn default_max_recheck() -> usize {
    256
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisseminationConfig {
    pub mailbox_size: usize,
    pub workers: usize,
    pub queue_size: usize,
    pub backpressure: BackpressureConfig,
}

impl Default for DisseminationConfig {
    fn default() -> Self {
        Self {
            mailbox_size: 1024,
            workers: 4,
            queue_size: 1024,
            backpressure: BackpressureConfig::Block { timeout_ms: 1_000 },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    pub period_ms: u64,
    pub round_timeout_ms: u64,
    pub epoch_window: u64,
    pub max_requests: usize,
    pub max_response_items: usize,
    /// Requests each peer may send per second.
    pub serve_rate: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            period_ms: 5_000,
            round_timeout_ms: 2_000,
            epoch_window: 2,
            max_requests: 64,
            max_response_items: 1024,
            serve_rate: 10,
        }
    }
}

/// Node configuration, as loaded from YAML.
///
/// Every section is optional. Durations are in milliseconds.
///
/// ```yaml
/// limits:
///   public_key: 144
///   signature: 96
///   message_hash: 64
///   proof: 1048576
/// aggregator:
///   policy:
///     type: low_cost
///     max_unsigners: 2
/// dissemination:
///   backpressure:
///     type: drop
/// recovery:
///   period_ms: 1000
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub limits: Limits,
    pub processor: ProcessorConfig,
    pub aggregator: Option<AggregatorConfig>,
    pub dissemination: DisseminationConfig,
    pub recovery: RecoveryConfig,
}

impl Config {
    /// Parses and validates a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.processor.lock_shards == 0 {
            return Err(Error::InvalidConfig("processor.lock_shards must be positive"));
        }
        if let Some(aggregator) = &self.aggregator {
            if aggregator.mailbox_size == 0 {
                return Err(Error::InvalidConfig(
                    "aggregator.mailbox_size must be positive",
                ));
            }
            if aggregator.recheck_interval_ms == 0 || aggregator.max_recheck == 0 {
                return Err(Error::InvalidConfig(
                    "aggregator.recheck_interval_ms and aggregator.max_recheck must be positive",
                ));
            }
        }
        let dissemination = &self.dissemination;
        if dissemination.mailbox_size == 0 {
            return Err(Error::InvalidConfig(
                "dissemination.mailbox_size must be positive",
            ));
        }
        if dissemination.workers == 0 || dissemination.queue_size == 0 {
            return Err(Error::InvalidConfig(
                "dissemination.workers and dissemination.queue_size must be positive",
            ));
        }
        let recovery = &self.recovery;
        if recovery.period_ms == 0 || recovery.round_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "recovery.period_ms and recovery.round_timeout_ms must be positive",
            ));
        }
        if recovery.max_requests == 0 {
            return Err(Error::InvalidConfig("recovery.max_requests must be positive"));
        }
        if recovery.max_response_items < recovery.max_requests {
            return Err(Error::InvalidConfig(
                "recovery.max_response_items must be at least recovery.max_requests",
            ));
        }
        if recovery.serve_rate == 0 {
            return Err(Error::InvalidConfig("recovery.serve_rate must be positive"));
        }
        Ok(())
    }

    pub fn processor<R: Repository>(&self, repository: R) -> processor::Config<R> {
        processor::Config {
            repository,
            aggregators: aggregator::Registry::default(),
            lock_shards: self.processor.lock_shards,
        }
    }

    pub fn aggregator(&self) -> Option<aggregation::Config> {
        self.aggregator.as_ref().map(|cfg| aggregation::Config {
            policy: cfg.policy.build(),
            verification_type: cfg.verification_type,
            mailbox_size: cfg.mailbox_size,
            mailbox_timeout: Duration::from_millis(cfg.mailbox_timeout_ms),
            recheck_interval: Duration::from_millis(cfg.recheck_interval_ms),
            max_recheck: cfg.max_recheck,
        })
    }

    pub fn dissemination<R: Repository>(
        &self,
        processor: processor::Processor<R>,
        identity: PeerId,
    ) -> dissemination::Config<R> {
        let cfg = &self.dissemination;
        dissemination::Config {
            processor,
            identity,
            limits: self.limits,
            mailbox_size: cfg.mailbox_size,
            pool: pool::Config {
                workers: cfg.workers,
                queue_size: cfg.queue_size,
                backpressure: cfg.backpressure.into(),
            },
        }
    }

    pub fn recovery<R: Repository, P: Peers>(
        &self,
        processor: processor::Processor<R>,
        peers: P,
    ) -> Result<recovery::Config<R, P>, Error> {
        let cfg = &self.recovery;
        let rate = NonZeroU32::new(cfg.serve_rate)
            .ok_or(Error::InvalidConfig("recovery.serve_rate must be positive"))?;
        Ok(recovery::Config {
            processor,
            peers,
            limits: self.limits,
            period: Duration::from_millis(cfg.period_ms),
            round_timeout: Duration::from_millis(cfg.round_timeout_ms),
            epoch_window: cfg.epoch_window,
            max_requests: cfg.max_requests,
            max_response_items: cfg.max_response_items,
            serve_quota: Quota::per_second(rate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_empty_is_default() {
        assert_eq!(Config::from_yaml("{}").unwrap(), Config::default());
    }

    #[test]
    fn test_parse() {
        let yaml = r#"
limits:
  public_key: 144
  signature: 96
  message_hash: 32
  proof: 4096
aggregator:
  policy:
    type: low_cost
    max_unsigners: 2
  verification_type: simple
dissemination:
  workers: 8
  backpressure:
    type: drop
recovery:
  period_ms: 1000
  round_timeout_ms: 500
  serve_rate: 5
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.limits.message_hash, 32);
        assert_eq!(config.limits.proof, 4096);
        let aggregator = config.aggregator.as_ref().unwrap();
        assert_eq!(
            aggregator.policy,
            policy::Config::LowCost { max_unsigners: 2 }
        );
        assert_eq!(aggregator.mailbox_size, 1024);
        assert_eq!(config.dissemination.workers, 8);
        assert_eq!(config.dissemination.queue_size, 1024);
        assert_eq!(
            Backpressure::from(config.dissemination.backpressure),
            Backpressure::Drop
        );
        assert_eq!(config.recovery.period_ms, 1000);
        assert_eq!(config.recovery.max_requests, 64);

        let aggregator = config.aggregator().unwrap();
        assert_eq!(aggregator.verification_type, VerificationType::Simple);
        assert_eq!(aggregator.mailbox_timeout, Duration::from_secs(1));
        assert_eq!(aggregator.recheck_interval, Duration::from_secs(5));
        assert_eq!(aggregator.max_recheck, 256);
    }

    #[test]
    fn test_block_backpressure() {
        let yaml = "dissemination:\n  backpressure:\n    type: block\n    timeout_ms: 250\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            Backpressure::from(config.dissemination.backpressure),
            Backpressure::Block(Duration::from_millis(250))
        );
        assert!(config.aggregator().is_none());
    }

    #[test]
    fn test_unknown_field() {
        let err = Config::from_yaml("recovery:\n  period: 5\n").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test_case("processor:\n  lock_shards: 0\n"; "no lock shards")]
    #[test_case("dissemination:\n  workers: 0\n"; "no workers")]
    #[test_case("recovery:\n  period_ms: 0\n"; "zero period")]
    #[test_case("recovery:\n  round_timeout_ms: 0\n"; "zero timeout")]
    #[test_case("recovery:\n  max_requests: 10\n  max_response_items: 5\n"; "items below requests")]
    #[test_case("recovery:\n  serve_rate: 0\n"; "zero serve rate")]
    #[test_case("aggregator:\n  mailbox_size: 0\n"; "no aggregator mailbox")]
    #[test_case("aggregator:\n  recheck_interval_ms: 0\n"; "zero recheck interval")]
    fn test_invalid(yaml: &str) {
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
