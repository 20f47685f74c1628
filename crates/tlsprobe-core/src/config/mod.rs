//! Probe configuration with builder pattern.
//!
//! A `ProbeConfig` is immutable once built and is shared between connection
//! contexts as `Arc<ProbeConfig>`.

use std::fmt;
use std::time::Duration;

use crate::handshake::fragment::DEFAULT_MTU;
use crate::{CipherSuite, ProtocolVersion};

/// Probe configuration.
#[derive(Clone)]
pub struct ProbeConfig {
    /// Version offered in ClientHello and written on records by default.
    pub highest_protocol_version: ProtocolVersion,
    /// Suite assumed before the peer selects one.
    pub default_cipher_suite: CipherSuite,
    /// Suites offered in ClientHello.
    pub cipher_suites: Vec<CipherSuite>,
    /// Target host name or address.
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Read timeout; an expired read ends the receive loop.
    pub read_timeout: Duration,
    /// Use datagram framing (DTLS records and handshake fragments).
    pub datagram: bool,
    /// Stop receiving once a fatal alert breaks the expected sequence.
    pub early_stop: bool,
    /// Stop receiving as soon as the expected messages have arrived.
    pub quick_receive: bool,
    /// Skip remaining actions once a fatal alert was received.
    pub stop_actions_after_fatal: bool,
    /// Stop receiving as soon as a fatal alert was received.
    pub stop_receiving_after_fatal: bool,
    /// Try HTTP parsing on application data first.
    pub https_parsing_enabled: bool,
    pub workflow_executor_should_open: bool,
    pub workflow_executor_should_close: bool,
    /// How many extra fetches are attempted before falling back to soft parsing.
    pub max_record_refetch: usize,
    /// Largest handshake fragment body sent over DTLS.
    pub max_fragment_payload: usize,
    /// Worker threads in the parallel executor.
    pub parallel_threads: usize,
    /// Extra attempts per task after the first failed one.
    pub reexecutions: u32,
    /// Added to the sleep before each retry.
    pub retry_backoff: Duration,
}

impl fmt::Debug for ProbeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeConfig")
            .field("highest_protocol_version", &self.highest_protocol_version)
            .field("cipher_suites", &self.cipher_suites)
            .field("target", &format_args!("{}:{}", self.host, self.port))
            .field("datagram", &self.datagram)
            .field("early_stop", &self.early_stop)
            .field("quick_receive", &self.quick_receive)
            .field("stop_actions_after_fatal", &self.stop_actions_after_fatal)
            .field("parallel_threads", &self.parallel_threads)
            .field("reexecutions", &self.reexecutions)
            .finish_non_exhaustive()
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ProbeConfig {
    pub fn builder() -> ProbeConfigBuilder {
        ProbeConfigBuilder::default()
    }

    /// Derive a builder pre-populated with this configuration.
    pub fn to_builder(&self) -> ProbeConfigBuilder {
        ProbeConfigBuilder {
            inner: self.clone(),
        }
    }

    /// `host:port` of the target.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for `ProbeConfig`.
pub struct ProbeConfigBuilder {
    inner: ProbeConfig,
}

impl Default for ProbeConfigBuilder {
    fn default() -> Self {
        Self {
            inner: ProbeConfig {
                highest_protocol_version: ProtocolVersion::TLS12,
                default_cipher_suite: CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
                cipher_suites: vec![
                    CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
                    CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA,
                    CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA256,
                    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
                    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
                    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256,
                    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384,
                    CipherSuite::TLS_RSA_WITH_3DES_EDE_CBC_SHA,
                ],
                host: "localhost".into(),
                port: 443,
                connect_timeout: Duration::from_secs(5),
                read_timeout: Duration::from_millis(1000),
                datagram: false,
                early_stop: false,
                quick_receive: true,
                stop_actions_after_fatal: false,
                stop_receiving_after_fatal: false,
                https_parsing_enabled: false,
                workflow_executor_should_open: true,
                workflow_executor_should_close: true,
                max_record_refetch: 1,
                max_fragment_payload: DEFAULT_MTU,
                parallel_threads: 1,
                reexecutions: 3,
                retry_backoff: Duration::from_millis(1000),
            },
        }
    }
}

impl fmt::Debug for ProbeConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeConfigBuilder")
            .field("target", &self.inner.target())
            .finish_non_exhaustive()
    }
}

impl ProbeConfigBuilder {
    pub fn highest_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.inner.highest_protocol_version = version;
        self
    }

    pub fn default_cipher_suite(mut self, suite: CipherSuite) -> Self {
        self.inner.default_cipher_suite = suite;
        self
    }

    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.inner.cipher_suites = suites.to_vec();
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.inner.host = host.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.inner.port = port;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.inner.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.inner.read_timeout = timeout;
        self
    }

    /// Switch to datagram framing. Also moves the default version to DTLS 1.2
    /// unless a DTLS version was already chosen.
    pub fn datagram(mut self, enabled: bool) -> Self {
        self.inner.datagram = enabled;
        if enabled && !self.inner.highest_protocol_version.is_dtls() {
            self.inner.highest_protocol_version = ProtocolVersion::DTLS12;
        }
        self
    }

    pub fn early_stop(mut self, enabled: bool) -> Self {
        self.inner.early_stop = enabled;
        self
    }

    pub fn quick_receive(mut self, enabled: bool) -> Self {
        self.inner.quick_receive = enabled;
        self
    }

    pub fn stop_actions_after_fatal(mut self, enabled: bool) -> Self {
        self.inner.stop_actions_after_fatal = enabled;
        self
    }

    pub fn stop_receiving_after_fatal(mut self, enabled: bool) -> Self {
        self.inner.stop_receiving_after_fatal = enabled;
        self
    }

    pub fn https_parsing_enabled(mut self, enabled: bool) -> Self {
        self.inner.https_parsing_enabled = enabled;
        self
    }

    pub fn workflow_executor_should_open(mut self, enabled: bool) -> Self {
        self.inner.workflow_executor_should_open = enabled;
        self
    }

    pub fn workflow_executor_should_close(mut self, enabled: bool) -> Self {
        self.inner.workflow_executor_should_close = enabled;
        self
    }

    pub fn max_record_refetch(mut self, n: usize) -> Self {
        self.inner.max_record_refetch = n;
        self
    }

    pub fn max_fragment_payload(mut self, n: usize) -> Self {
        self.inner.max_fragment_payload = n;
        self
    }

    pub fn parallel_threads(mut self, n: usize) -> Self {
        self.inner.parallel_threads = n;
        self
    }

    pub fn reexecutions(mut self, n: u32) -> Self {
        self.inner.reexecutions = n;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.inner.retry_backoff = backoff;
        self
    }

    pub fn build(self) -> ProbeConfig {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.highest_protocol_version, ProtocolVersion::TLS12);
        assert_eq!(cfg.max_record_refetch, 1);
        assert!(cfg.quick_receive);
        assert!(!cfg.early_stop);
        assert!(cfg.workflow_executor_should_open);
        assert!(cfg.cipher_suites.iter().all(|s| s.is_cbc()));
    }

    #[test]
    fn test_builder_overrides() {
        let cfg = ProbeConfig::builder()
            .host("10.0.0.1")
            .port(8443)
            .early_stop(true)
            .parallel_threads(4)
            .reexecutions(2)
            .retry_backoff(Duration::from_millis(5))
            .build();
        assert_eq!(cfg.target(), "10.0.0.1:8443");
        assert!(cfg.early_stop);
        assert_eq!(cfg.parallel_threads, 4);
        assert_eq!(cfg.reexecutions, 2);
        assert_eq!(cfg.retry_backoff, Duration::from_millis(5));
    }

    #[test]
    fn test_datagram_switches_version() {
        let cfg = ProbeConfig::builder().datagram(true).build();
        assert!(cfg.datagram);
        assert_eq!(cfg.highest_protocol_version, ProtocolVersion::DTLS12);

        let cfg = ProbeConfig::builder()
            .highest_protocol_version(ProtocolVersion::DTLS10)
            .datagram(true)
            .build();
        assert_eq!(cfg.highest_protocol_version, ProtocolVersion::DTLS10);
    }

    #[test]
    fn test_to_builder_keeps_values() {
        let base = ProbeConfig::builder().port(1234).build();
        let derived = base.to_builder().quick_receive(false).build();
        assert_eq!(derived.port, 1234);
        assert!(!derived.quick_receive);
    }

    #[test]
    fn test_debug_is_compact() {
        let dbg = format!("{:?}", ProbeConfig::default());
        assert!(dbg.contains("localhost:443"));
        assert!(dbg.contains(".."));
    }
}
