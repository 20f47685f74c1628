//! Padding-oracle attack driver.
//!
//! Every padding vector runs as its own trace. Responses are bucketed by the
//! length of the last record sent, so that vectors which only differ in
//! padding or MAC validity are compared with each other. A difference inside
//! a bucket is only reported after it shows up again, unchanged, in every
//! rescan.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use tlsprobe_core::config::ProbeConfig;
use tlsprobe_core::parallel::ParallelExecutor;
use tlsprobe_core::transport::{Connector, TcpConnector, UdpConnector};
use tlsprobe_core::workflow::State;
use tlsprobe_core::{CipherSuite, ProtocolVersion};
use tlsprobe_types::ProbeError;

use crate::padding::{PaddingVectorGenerator, RecordGeneratorType, VectorGenerator, VectorGeneratorType};
use crate::response::{compare, fingerprint_state, EqualityError, ResponseFingerprint};

/// Fingerprints per bucket key, in vector order.
pub type ResponseMap = BTreeMap<usize, Vec<ResponseFingerprint>>;

/// Bucket key used when responses are not grouped by record length.
pub const UNGROUPED_BUCKET: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaddingOracleConfig {
    pub record_generator: RecordGeneratorType,
    pub vector_generator: VectorGeneratorType,
    /// Confirmation scans after a difference was found.
    pub rescans: usize,
}

impl Default for PaddingOracleConfig {
    fn default() -> Self {
        Self {
            record_generator: RecordGeneratorType::Short,
            vector_generator: VectorGeneratorType::Classic,
            rescans: 2,
        }
    }
}

pub struct PaddingOracleAttacker {
    config: PaddingOracleConfig,
    probe: Arc<ProbeConfig>,
    connector: Arc<dyn Connector>,
    executor: ParallelExecutor,
    generator: Box<dyn VectorGenerator>,
    response_map: Option<ResponseMap>,
    shaky_scans: bool,
    tested_suite: Option<CipherSuite>,
    tested_version: Option<ProtocolVersion>,
}

impl std::fmt::Debug for PaddingOracleAttacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaddingOracleAttacker")
            .field("config", &self.config)
            .field("target", &self.probe.target())
            .field("executor", &self.executor)
            .field("shaky_scans", &self.shaky_scans)
            .finish_non_exhaustive()
    }
}

impl PaddingOracleAttacker {
    /// Create an attacker reaching the peer through `connector`.
    ///
    /// Receiving stops early on fatal alerts and once the expected messages
    /// are in, whatever `probe` says.
    pub fn new(
        config: PaddingOracleConfig,
        probe: ProbeConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ProbeError> {
        let probe = Arc::new(force_attack_flags(probe));
        let executor = ParallelExecutor::from_config(&probe)?;
        let generator = Box::new(PaddingVectorGenerator::new(
            config.vector_generator,
            config.record_generator,
        ));
        Ok(Self {
            config,
            probe,
            connector,
            executor,
            generator,
            response_map: None,
            shaky_scans: false,
            tested_suite: None,
            tested_version: None,
        })
    }

    /// Create an attacker talking to `probe.host:probe.port` over TCP, or UDP
    /// when `probe.datagram` is set.
    pub fn for_target(config: PaddingOracleConfig, probe: ProbeConfig) -> Result<Self, ProbeError> {
        let shared = Arc::new(force_attack_flags(probe.clone()));
        let connector: Arc<dyn Connector> = if shared.datagram {
            Arc::new(UdpConnector::new(shared))
        } else {
            Arc::new(TcpConnector::new(shared))
        };
        Self::new(config, probe, connector)
    }

    /// Replace the vector generator.
    pub fn with_generator(mut self, generator: Box<dyn VectorGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn config(&self) -> &PaddingOracleConfig {
        &self.config
    }

    pub fn probe_config(&self) -> &ProbeConfig {
        &self.probe
    }

    /// Bucket map of the first scan of the last [`is_vulnerable`] call.
    ///
    /// [`is_vulnerable`]: Self::is_vulnerable
    pub fn get_response_map(&self) -> Option<&ResponseMap> {
        self.response_map.as_ref()
    }

    /// Whether the rescans of the last run disagreed with the first scan.
    pub fn scans_were_shaky(&self) -> bool {
        self.shaky_scans
    }

    pub fn tested_suite(&self) -> Option<CipherSuite> {
        self.tested_suite
    }

    pub fn tested_version(&self) -> Option<ProtocolVersion> {
        self.tested_version
    }

    /// Run the attack.
    ///
    /// `Some(true)` means a confirmed oracle, `Some(false)` no oracle or one
    /// that did not survive the rescans (see [`scans_were_shaky`]). `None`
    /// means the vectors could not be measured.
    ///
    /// # Errors
    ///
    /// [`ProbeError::OracleUnstable`] if a rescan grouped the responses
    /// differently from the first scan, and [`ProbeError::Configuration`] for
    /// a suite the vectors cannot be built for.
    ///
    /// [`scans_were_shaky`]: Self::scans_were_shaky
    pub fn is_vulnerable(&mut self) -> Result<Option<bool>, ProbeError> {
        self.shaky_scans = false;
        self.response_map = None;
        info!(
            target = %self.probe.target(),
            records = %self.config.record_generator,
            vectors = %self.config.vector_generator,
            "starting padding oracle scan"
        );
        match self.scan() {
            Ok(verdict) => {
                info!(vulnerable = verdict, shaky = self.shaky_scans, "padding oracle scan finished");
                Ok(Some(verdict))
            }
            Err(e @ ProbeError::OracleUnstable(_)) => {
                warn!(error = %e, "responses changed shape between scans");
                self.shaky_scans = true;
                Err(e)
            }
            Err(
                e @ (ProbeError::RetriesExhausted { .. }
                | ProbeError::WorkflowExecution(_)
                | ProbeError::AttackFailed(_)),
            ) => {
                warn!(error = %e, "could not execute the test vectors");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn scan(&mut self) -> Result<bool, ProbeError> {
        let map = self.create_response_map()?;
        let reference = get_equality_error(&map);
        let outcome = if reference.is_none() {
            info!("no behavioral difference between test vectors");
            Ok(false)
        } else {
            info!(error = %reference, "{}", reference.translation());
            self.rescan(&map, reference)
        };
        self.response_map = Some(map);
        outcome
    }

    fn rescan(&mut self, reference_map: &ResponseMap, reference: EqualityError) -> Result<bool, ProbeError> {
        for scan in 1..=self.config.rescans {
            info!(scan, of = self.config.rescans, "rescanning to confirm the difference");
            let map = self.create_response_map()?;
            let error = get_equality_error(&map);
            if error != reference || !look_equal(reference_map, &map)? {
                warn!(
                    scan,
                    first = %reference,
                    rescan = %error,
                    "rescan disagrees with the first scan"
                );
                self.shaky_scans = true;
                return Ok(false);
            }
        }
        info!(error = %reference, "difference confirmed by every rescan");
        Ok(true)
    }

    /// Execute every vector once and bucket the fingerprints.
    ///
    /// Vectors cut short, e.g. by a fatal alert during the handshake, are left
    /// out. Fails with [`ProbeError::AttackFailed`] when no vector ran to the
    /// end.
    pub fn create_response_map(&mut self) -> Result<ResponseMap, ProbeError> {
        let traces = self.generator.generate(&self.probe)?;
        let states: Vec<State> = traces
            .into_iter()
            .map(|t| State::new(Arc::clone(&self.probe), t, Arc::clone(&self.connector)))
            .collect();
        let total = states.len();
        let states = self.executor.bulk_execute(states)?;

        let mut map = ResponseMap::new();
        let mut executed = 0;
        for state in &states {
            if !state.trace.all_actions_executed() {
                warn!(
                    trace = ?state.trace.name,
                    state = ?state.trace.state(),
                    "vector did not run to the end, skipping"
                );
                continue;
            }
            let Some(record) = state.trace.last_sent_record() else {
                debug!(trace = ?state.trace.name, "no record was sent, skipping");
                continue;
            };
            let key = if self.config.record_generator == RecordGeneratorType::VeryShort {
                UNGROUPED_BUCKET
            } else {
                record.length
            };
            let fp = fingerprint_state(state);
            debug!(trace = ?state.trace.name, bucket = key, response = %fp, "vector response");
            map.entry(key).or_default().push(fp);
            executed += 1;
            self.tested_suite = Some(state.context.chosen_cipher_suite());
            self.tested_version = Some(state.context.chosen_protocol_version());
        }
        if executed == 0 {
            return Err(ProbeError::AttackFailed(format!(
                "none of {total} test vectors ran to the end"
            )));
        }
        debug!(executed, total, buckets = map.len(), "response map created");
        Ok(map)
    }
}

fn force_attack_flags(probe: ProbeConfig) -> ProbeConfig {
    probe
        .to_builder()
        .early_stop(true)
        .stop_actions_after_fatal(true)
        .quick_receive(true)
        .build()
}

/// First difference inside any bucket: the first fingerprint of a bucket is
/// compared against every other one, buckets in key order.
pub fn get_equality_error(map: &ResponseMap) -> EqualityError {
    for (key, responses) in map {
        let Some((first, rest)) = responses.split_first() else {
            continue;
        };
        for (i, other) in rest.iter().enumerate() {
            let error = compare(first, other, true);
            if !error.is_none() {
                debug!(bucket = key, vector = i + 1, %error, "found a difference");
                return error;
            }
        }
    }
    EqualityError::None
}

/// Structural comparison of two scans, vector by vector.
///
/// Fails with [`ProbeError::OracleUnstable`] if the bucket layout differs.
pub fn look_equal(a: &ResponseMap, b: &ResponseMap) -> Result<bool, ProbeError> {
    if a.len() != b.len() {
        return Err(ProbeError::OracleUnstable(format!(
            "scans produced {} and {} buckets",
            a.len(),
            b.len()
        )));
    }
    for (key, first) in a {
        let second = b.get(key).ok_or_else(|| {
            ProbeError::OracleUnstable(format!("bucket {key} missing from the rescan"))
        })?;
        if first.len() != second.len() {
            return Err(ProbeError::OracleUnstable(format!(
                "bucket {key} holds {} responses in one scan and {} in the other",
                first.len(),
                second.len()
            )));
        }
        for (x, y) in first.iter().zip(second) {
            let error = compare(x, y, false);
            if !error.is_none() {
                debug!(bucket = key, %error, "scans differ");
                return Ok(false);
            }
        }
    }
    Ok(true)
}
