/// Errors raised while parsing records or protocol messages.
///
/// These describe malformed peer input. They are recovered from inside the
/// receive path and never reach the caller of a workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParserError {
    #[error("not enough data: need {need} bytes at offset {offset}, got {got}")]
    Truncated {
        offset: usize,
        need: usize,
        got: usize,
    },
    #[error("unknown content type: {0}")]
    UnknownContentType(u8),
    #[error("unexpected handshake type: {0}")]
    UnexpectedHandshakeType(u8),
    #[error("record too large: {0} bytes")]
    RecordTooLarge(usize),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("context adjustment failed: {0}")]
    Adjustment(String),
}

/// Errors surfaced by workflow execution, the parallel executor and attacks.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parser(#[from] ParserError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("workflow execution failed: {0}")]
    WorkflowExecution(String),
    #[error("attack failed: {0}")]
    AttackFailed(String),
    #[error("oracle unstable: {0}")]
    OracleUnstable(String),
    #[error("task failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ProbeError> },
    #[error("executor is shut down")]
    ExecutorShutdown,
    #[error("task failed: {0}")]
    TaskFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_error_display() {
        let err = ParserError::Truncated {
            offset: 3,
            need: 5,
            got: 2,
        };
        assert_eq!(
            err.to_string(),
            "not enough data: need 5 bytes at offset 3, got 2"
        );
        assert_eq!(
            ParserError::UnknownContentType(99).to_string(),
            "unknown content type: 99"
        );
    }

    #[test]
    fn test_probe_error_from_parser_error() {
        let err: ProbeError = ParserError::Malformed("bad".into()).into();
        assert!(matches!(err, ProbeError::Parser(ParserError::Malformed(_))));
    }

    #[test]
    fn test_probe_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: ProbeError = io.into();
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = ProbeError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ProbeError::WorkflowExecution("connect refused".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("connect refused"));
    }
}
