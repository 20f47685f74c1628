#![no_main]
use libfuzzer_sys::fuzz_target;
use tlsprobe_core::record::dtls::DtlsRecordLayer;
use tlsprobe_core::record::{PlainRecordLayer, RecordLayer};
use tlsprobe_core::ProtocolVersion;

fuzz_target!(|data: &[u8]| {
    let tls = PlainRecordLayer::default();
    let _ = tls.parse_records(data);
    let _ = tls.parse_records_soft(data);
    let dtls = DtlsRecordLayer::new(ProtocolVersion::DTLS12);
    let _ = dtls.parse_records_soft(data);
});
