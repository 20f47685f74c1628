//! Integration tests for tlsprobe.
//! Full padding-oracle scans and executor behavior against in-process peers.

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tlsprobe_attacks::padding::{
        PaddingVectorGenerator, RecordGeneratorType, VectorGenerator, VectorGeneratorType,
    };
    use tlsprobe_attacks::padding_oracle::{look_equal, ResponseMap};
    use tlsprobe_attacks::response::{compare, fingerprint_state};
    use tlsprobe_attacks::{EqualityError, PaddingOracleAttacker, PaddingOracleConfig};
    use tlsprobe_core::config::ProbeConfig;
    use tlsprobe_core::handshake::codec::{encode_server_hello_body, wrap_handshake, ServerHello};
    use tlsprobe_core::handshake::codec_dtls::wrap_dtls_handshake;
    use tlsprobe_core::message::{MessageKind, ProtocolMessage};
    use tlsprobe_core::parallel::ParallelExecutor;
    use tlsprobe_core::transport::memory::{Inbound, MemoryConnector, Responder};
    use tlsprobe_core::workflow::{State, TraceState, WorkflowTrace};
    use tlsprobe_core::{CipherSuite, ProtocolVersion};
    use tlsprobe_types::ProbeError;

    const BAD_RECORD_MAC: u8 = 20;
    const DECRYPTION_FAILED: u8 = 21;
    const SELECTED_SUITE: CipherSuite = CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA;

    fn tls_record(content_type: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![content_type, 3, 3];
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn dtls_record(content_type: u8, epoch: u16, seq: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![content_type, 0xFE, 0xFD];
        out.extend_from_slice(&epoch.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, 0, 0, seq]);
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn server_hello_body(version: ProtocolVersion) -> Vec<u8> {
        encode_server_hello_body(&ServerHello {
            version,
            random: [0x5E; 32],
            session_id: Vec::new(),
            cipher_suite: SELECTED_SUITE,
            compression_method: 0,
            extensions: Vec::new(),
        })
    }

    /// ServerHello, empty Certificate and ServerHelloDone in one record.
    fn server_flight() -> Vec<u8> {
        let mut body = wrap_handshake(2, &server_hello_body(ProtocolVersion::TLS12));
        body.extend(wrap_handshake(11, &[0, 0, 0]));
        body.extend(wrap_handshake(14, &[]));
        tls_record(22, &body)
    }

    fn server_finish() -> Vec<u8> {
        let mut out = tls_record(20, &[1]);
        out.extend(tls_record(22, &wrap_handshake(20, &[0; 12])));
        out
    }

    /// Whether the record body ends in well-formed CBC padding.
    fn padding_is_valid(body: &[u8]) -> bool {
        let Some(&last) = body.last() else {
            return false;
        };
        let n = last as usize + 1;
        body.len() >= n && body[body.len() - n..].iter().all(|&b| b == last)
    }

    /// A TLS peer that walks through the handshake and answers application
    /// data with the fatal alert chosen by `answer`, then closes.
    fn tls_peer<F>(answer: F) -> Arc<MemoryConnector>
    where
        F: Fn(&[u8]) -> u8 + Clone + Send + Sync + 'static,
    {
        Arc::new(MemoryConnector::new(move |_| {
            let answer = answer.clone();
            Ok(Box::new(move |data: &[u8]| match (data.first(), data.get(5)) {
                (Some(22), Some(1)) => vec![Inbound::Data(server_flight())],
                (Some(22), Some(16)) => vec![Inbound::Data(server_finish())],
                (Some(23), _) => {
                    let description = answer(&data[5..]);
                    vec![
                        Inbound::Data(tls_record(21, &[2, description])),
                        Inbound::Close,
                    ]
                }
                _ => Vec::new(),
            }) as Responder)
        }))
    }

    fn oracle_answer(body: &[u8]) -> u8 {
        if padding_is_valid(body) {
            BAD_RECORD_MAC
        } else {
            DECRYPTION_FAILED
        }
    }

    fn probe(threads: usize) -> ProbeConfig {
        ProbeConfig::builder()
            .parallel_threads(threads)
            .reexecutions(0)
            .retry_backoff(Duration::ZERO)
            .build()
    }

    fn attacker(
        records: RecordGeneratorType,
        threads: usize,
        connector: Arc<MemoryConnector>,
    ) -> PaddingOracleAttacker {
        let config = PaddingOracleConfig {
            record_generator: records,
            ..PaddingOracleConfig::default()
        };
        PaddingOracleAttacker::new(config, probe(threads), connector).unwrap()
    }

    // -------------------------------------------------------
    // 1. Peer with a padding oracle
    // -------------------------------------------------------
    #[test]
    fn test_oracle_peer_is_vulnerable() {
        let connector = tls_peer(oracle_answer);
        let mut attacker = attacker(RecordGeneratorType::Short, 4, connector.clone());

        assert_eq!(attacker.is_vulnerable().unwrap(), Some(true));
        assert!(!attacker.scans_were_shaky());
        // First scan plus two rescans of five vectors each.
        assert_eq!(connector.connections(), 15);
        assert_eq!(attacker.tested_suite(), Some(SELECTED_SUITE));
        assert_eq!(attacker.tested_version(), Some(ProtocolVersion::TLS12));

        let map = attacker.get_response_map().unwrap();
        let bucket = &map[&48];
        assert_eq!(bucket.len(), 5);
        assert_eq!(
            compare(&bucket[0], &bucket[1], true),
            EqualityError::AlertRecordContent
        );
    }

    #[test]
    fn test_oracle_peer_medium_vectors() {
        let connector = tls_peer(oracle_answer);
        let mut attacker = attacker(RecordGeneratorType::Medium, 3, connector);
        assert_eq!(attacker.is_vulnerable().unwrap(), Some(true));
        let keys: Vec<usize> = attacker.get_response_map().unwrap().keys().copied().collect();
        assert_eq!(keys, vec![48, 112]);
    }

    // -------------------------------------------------------
    // 2. Peer without an oracle
    // -------------------------------------------------------
    #[test]
    fn test_uniform_peer_is_not_vulnerable() {
        let connector = tls_peer(|_| BAD_RECORD_MAC);
        let mut attacker = attacker(RecordGeneratorType::Long, 4, connector.clone());

        assert_eq!(attacker.is_vulnerable().unwrap(), Some(false));
        assert!(!attacker.scans_were_shaky());
        // No rescans without a difference.
        assert_eq!(connector.connections(), 15);
        assert_eq!(attacker.get_response_map().unwrap().len(), 3);
    }

    // -------------------------------------------------------
    // 3. Peer answering one bucket with noise
    // -------------------------------------------------------
    #[test]
    fn test_flaky_peer_is_shaky() {
        let noisy = Arc::new(AtomicUsize::new(0));
        let answer = {
            let noisy = Arc::clone(&noisy);
            move |body: &[u8]| {
                if body.len() != 112 {
                    return BAD_RECORD_MAC;
                }
                // Every other answer in this bucket is flipped.
                if noisy.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    BAD_RECORD_MAC
                } else {
                    DECRYPTION_FAILED
                }
            }
        };
        let mut attacker = attacker(RecordGeneratorType::Medium, 4, tls_peer(answer));

        assert_eq!(attacker.is_vulnerable().unwrap(), Some(false));
        assert!(attacker.scans_were_shaky());
        // First scan and one rescan.
        assert_eq!(noisy.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_rejected_handshakes_are_indeterminate() {
        // Every ClientHello is refused; only some connections are closed, so
        // the socket states differ between vectors that never got a padding
        // record out.
        let connector = Arc::new(MemoryConnector::new(|n| {
            Ok(Box::new(move |data: &[u8]| match data.first() {
                Some(22) => {
                    let mut out = vec![Inbound::Data(tls_record(21, &[2, 40]))];
                    if n % 5 == 0 {
                        out.push(Inbound::Close);
                    }
                    out
                }
                _ => Vec::new(),
            }) as Responder)
        }));
        let mut attacker = attacker(RecordGeneratorType::Short, 1, connector.clone());

        assert_eq!(attacker.is_vulnerable().unwrap(), None);
        assert!(attacker.get_response_map().is_none());
        assert_eq!(connector.connections(), 5);
    }

    // -------------------------------------------------------
    // 4. Bucket layout is stable across scans
    // -------------------------------------------------------
    #[test]
    fn test_bucket_keys_stable_across_scans() {
        let mut attacker = attacker(RecordGeneratorType::Long, 2, tls_peer(oracle_answer));
        let first = attacker.create_response_map().unwrap();
        let second = attacker.create_response_map().unwrap();
        assert_eq!(
            first.keys().collect::<Vec<_>>(),
            second.keys().collect::<Vec<_>>()
        );
        assert!(look_equal(&first, &second).unwrap());
    }

    #[test]
    fn test_unstable_bucket_layout_is_an_error() {
        let mut attacker = attacker(RecordGeneratorType::Medium, 2, tls_peer(oracle_answer));
        let full = attacker.create_response_map().unwrap();
        let mut partial: ResponseMap = full.clone();
        partial.remove(&112);
        assert!(matches!(
            look_equal(&full, &partial),
            Err(ProbeError::OracleUnstable(_))
        ));
        if let Some(bucket) = partial.get_mut(&48) {
            bucket.pop();
        }
        partial.insert(112, full[&112].clone());
        assert!(matches!(
            look_equal(&full, &partial),
            Err(ProbeError::OracleUnstable(_))
        ));
    }

    // -------------------------------------------------------
    // 5. Reset idempotence
    // -------------------------------------------------------
    #[test]
    fn test_reset_and_reexecute_is_structurally_equal() {
        let config = Arc::new(probe(1));
        let traces = PaddingVectorGenerator::new(VectorGeneratorType::Classic, RecordGeneratorType::Short)
            .generate(&config)
            .unwrap();
        let trace = traces.into_iter().next().unwrap();
        let mut state = State::new(config, trace, tls_peer(oracle_answer));

        state.execute().unwrap();
        assert_eq!(state.trace.state(), TraceState::Completed);
        let first = fingerprint_state(&state);

        state.reset();
        assert_eq!(state.trace.state(), TraceState::NotStarted);
        assert!(state.trace.last_sent_record().is_none());

        state.execute().unwrap();
        let second = fingerprint_state(&state);
        assert_eq!(compare(&first, &second, false), EqualityError::None);
        assert_eq!(first.records[0].protocol_message_bytes, vec![2, BAD_RECORD_MAC]);
    }

    // -------------------------------------------------------
    // 6. Parallel executor: barrier and backoff schedule
    // -------------------------------------------------------
    fn alert_trace() -> WorkflowTrace {
        WorkflowTrace::new()
            .send(vec![ProtocolMessage::ApplicationData(vec![1, 2, 3])])
            .receive(vec![MessageKind::Alert])
    }

    #[test]
    fn test_bulk_execute_waits_for_slowest_task() {
        let connector = Arc::new(MemoryConnector::new(|n| {
            let delay = Duration::from_millis(10 * (n % 4));
            Ok(Box::new(move |_: &[u8]| {
                std::thread::sleep(delay);
                vec![Inbound::Data(tls_record(21, &[2, 40]))]
            }) as Responder)
        }));
        let config = Arc::new(probe(4));
        let executor = ParallelExecutor::from_config(&config).unwrap();
        let states: Vec<State> = (0..8)
            .map(|_| State::new(Arc::clone(&config), alert_trace(), connector.clone()))
            .collect();

        let start = Instant::now();
        let done = executor.bulk_execute(states).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(done.len(), 8);
        assert!(done.iter().all(|s| s.trace.state() == TraceState::Completed));
        assert!(done
            .iter()
            .all(|s| fingerprint_state(s).message_classes == vec![MessageKind::Alert]));
    }

    #[test]
    fn test_failing_tasks_follow_backoff_schedule() {
        let connector = Arc::new(MemoryConnector::new(|_| {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }));
        let backoff = Duration::from_millis(20);
        let executor = ParallelExecutor::new(3, 2, backoff).unwrap();
        let config = Arc::new(ProbeConfig::default());
        let states: Vec<State> = (0..3)
            .map(|_| State::new(Arc::clone(&config), alert_trace(), connector.clone()))
            .collect();

        let start = Instant::now();
        let err = executor.bulk_execute(states).unwrap_err();
        // Each task waits backoff, then 2 * backoff.
        assert!(start.elapsed() >= backoff * 3);
        match err {
            ProbeError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ProbeError::WorkflowExecution(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(connector.connections(), 9);
    }

    // -------------------------------------------------------
    // 7. DTLS scan with cookie exchange
    // -------------------------------------------------------
    fn dtls_handshake_record(msg_type: u8, seq: u16, body: &[u8]) -> Vec<u8> {
        dtls_record(
            22,
            0,
            seq as u8,
            &wrap_dtls_handshake(msg_type, body.len(), seq, 0, body),
        )
    }

    #[test]
    fn test_dtls_scan_uses_cookie() {
        const COOKIE: [u8; 4] = [0xC0, 0x0C, 0x1E, 0x55];
        let saw_cookie = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_cookie);
        let connector = Arc::new(MemoryConnector::new(move |_| {
            let flag = Arc::clone(&flag);
            Ok(Box::new(move |data: &[u8]| match (data.first(), data.get(13)) {
                (Some(22), Some(1)) => {
                    // 13-byte record header, 12-byte handshake header, then
                    // version, random and an empty session id.
                    let cookie_len = data.get(25 + 35).copied().unwrap_or(0);
                    if cookie_len == 0 {
                        let mut hvr = vec![0xFE, 0xFD, COOKIE.len() as u8];
                        hvr.extend_from_slice(&COOKIE);
                        return vec![Inbound::Data(dtls_handshake_record(3, 0, &hvr))];
                    }
                    if data.windows(COOKIE.len()).any(|w| w == COOKIE) {
                        flag.store(true, Ordering::SeqCst);
                    }
                    let mut flight =
                        dtls_handshake_record(2, 1, &server_hello_body(ProtocolVersion::DTLS12));
                    flight.extend(dtls_handshake_record(11, 2, &[0, 0, 0]));
                    flight.extend(dtls_handshake_record(14, 3, &[]));
                    vec![Inbound::Data(flight)]
                }
                (Some(22), Some(16)) => {
                    let mut finish = dtls_record(20, 0, 4, &[1]);
                    finish.extend(dtls_record(
                        22,
                        1,
                        0,
                        &wrap_dtls_handshake(20, 12, 4, 0, &[0; 12]),
                    ));
                    vec![Inbound::Data(finish)]
                }
                (Some(23), _) => vec![
                    Inbound::Data(dtls_record(21, 1, 1, &[2, BAD_RECORD_MAC])),
                    Inbound::Close,
                ],
                _ => Vec::new(),
            }) as Responder)
        }));

        let probe = probe(2).to_builder().datagram(true).build();
        let mut attacker =
            PaddingOracleAttacker::new(PaddingOracleConfig::default(), probe, connector).unwrap();

        assert_eq!(attacker.is_vulnerable().unwrap(), Some(false));
        assert!(saw_cookie.load(Ordering::SeqCst));
        assert_eq!(attacker.tested_suite(), Some(SELECTED_SUITE));
        assert_eq!(attacker.tested_version(), Some(ProtocolVersion::DTLS12));
        let map = attacker.get_response_map().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.values().next().map(Vec::len), Some(5));
    }

    // -------------------------------------------------------
    // 8. Response map export
    // -------------------------------------------------------
    #[test]
    fn test_response_map_serializes() {
        let mut attacker = attacker(RecordGeneratorType::Short, 2, tls_peer(oracle_answer));
        attacker.is_vulnerable().unwrap();
        let json = serde_json::to_value(attacker.get_response_map().unwrap()).unwrap();
        let bucket = json["48"].as_array().unwrap();
        assert_eq!(bucket.len(), 5);
        assert_eq!(bucket[0]["socket_state"], "Closed");
        assert_eq!(bucket[0]["records"][0]["content_type"], "Alert");
    }
}
