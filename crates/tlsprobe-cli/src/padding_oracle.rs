//! Padding oracle command (`padding-oracle`).

use tlsprobe_attacks::padding::{RecordGeneratorType, VectorGeneratorType};
use tlsprobe_attacks::{PaddingOracleAttacker, PaddingOracleConfig};
use tlsprobe_core::config::ProbeConfig;
use tlsprobe_core::CipherSuite;

pub struct Options<'a> {
    pub connect: &'a str,
    pub threads: usize,
    pub reexecutions: u32,
    pub record_generator: &'a str,
    pub vector_generator: &'a str,
    pub suite: Option<&'a str>,
    pub dtls: bool,
    pub dump_responses: bool,
}

pub fn run(opts: &Options<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let (host, port) = parse_connect(opts.connect)?;

    let config = PaddingOracleConfig {
        record_generator: opts.record_generator.parse::<RecordGeneratorType>()?,
        vector_generator: opts.vector_generator.parse::<VectorGeneratorType>()?,
        ..PaddingOracleConfig::default()
    };

    let mut builder = ProbeConfig::builder()
        .host(&host)
        .port(port)
        .parallel_threads(opts.threads)
        .reexecutions(opts.reexecutions)
        .datagram(opts.dtls);
    if let Some(suite) = opts.suite {
        builder = builder.default_cipher_suite(parse_suite(suite)?);
    }

    let mut attacker = PaddingOracleAttacker::for_target(config, builder.build())?;
    let verdict = attacker.is_vulnerable()?;

    if let (Some(suite), Some(version)) = (attacker.tested_suite(), attacker.tested_version()) {
        println!("Tested: suite 0x{:04X}, version 0x{:04X}", suite.0, version.0);
    }
    match verdict {
        Some(v) => println!("Vulnerable: {v}"),
        None => println!("Vulnerable: Uncertain"),
    }
    if attacker.scans_were_shaky() {
        println!("Note: rescans did not reproduce the first scan");
    }
    if opts.dump_responses {
        if let Some(map) = attacker.get_response_map() {
            println!("{}", serde_json::to_string_pretty(map)?);
        }
    }
    Ok(())
}

/// Split `host:port`, defaulting the port to 443.
fn parse_connect(connect: &str) -> Result<(String, u16), String> {
    match connect.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|e| format!("invalid port in '{connect}': {e}"))?;
            Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
        }
        Some(_) => Err(format!("missing host in '{connect}'")),
        None => Ok((connect.to_string(), 443)),
    }
}

fn parse_suite(s: &str) -> Result<CipherSuite, String> {
    let hex = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(hex, 16)
        .map(CipherSuite)
        .map_err(|e| format!("invalid cipher suite '{s}': {e}"))
}
