//! Message dispatcher: turns decrypted record payload into protocol messages.
//!
//! Parsing never fails as a whole. For each position in the buffer the
//! handlers are tried in order:
//!
//! 1. HTTP (application data only, when enabled),
//! 2. the handler for the content type (and handshake type byte),
//! 3. the unknown-handshake handler (handshake content only),
//! 4. the unknown handler, which swallows the rest of the buffer.
//!
//! Without a content type (bytes that did not form a record) the SSLv2
//! handler is tried before the unknown handler.

use tracing::debug;

use crate::context::TlsContext;
use crate::message::handler::{
    get_handler, https_handlers, unknown_handshake_handler, MessageHandler, ParseState,
    UnknownHandler,
};
use crate::message::ProtocolMessage;
use crate::record::ContentType;

/// Parse every message in `data`.
///
/// Each message adjusts `context` before the next one is parsed, so later
/// messages in the buffer see the state set up by earlier ones.
/// `is_fragment` parses handshake content as DTLS fragments.
///
/// # Panics
///
/// Panics if a handler reports success without advancing the cursor; that is
/// a handler bug and would otherwise loop forever.
pub fn parse_messages(
    context: &mut TlsContext,
    data: &[u8],
    content_type: Option<ContentType>,
    is_fragment: bool,
) -> Vec<ProtocolMessage> {
    let https = context.config.https_parsing_enabled;
    let mut state = ParseState::from_context(context, is_fragment);
    parse_with(data, content_type, https, &mut state, |message, state| {
        if let Err(e) = message.adjust_context(context) {
            debug!(kind = ?message.kind(), error = %e, "context adjustment failed");
        }
        *state = ParseState::from_context(context, is_fragment);
    })
}

/// Context-free variant of [`parse_messages`]: handlers see no negotiated
/// state.
pub fn dispatch(
    data: &[u8],
    content_type: Option<ContentType>,
    is_fragment: bool,
    https_parsing_enabled: bool,
) -> Vec<ProtocolMessage> {
    let mut state = ParseState {
        is_fragment,
        ..ParseState::default()
    };
    parse_with(data, content_type, https_parsing_enabled, &mut state, |_, _| {})
}

fn parse_with<F>(
    data: &[u8],
    content_type: Option<ContentType>,
    https_parsing_enabled: bool,
    state: &mut ParseState,
    mut after_message: F,
) -> Vec<ProtocolMessage>
where
    F: FnMut(&ProtocolMessage, &mut ParseState),
{
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let unknown = UnknownHandler { content_type };
        let sub_type = if state.is_fragment {
            None
        } else {
            data.get(offset).copied()
        };

        let mut candidates: Vec<&dyn MessageHandler> = Vec::with_capacity(5);
        if https_parsing_enabled && content_type == Some(ContentType::ApplicationData) {
            candidates.extend(https_handlers());
        }
        candidates.push(get_handler(content_type, sub_type));
        if content_type == Some(ContentType::Handshake) && !state.is_fragment {
            candidates.push(unknown_handshake_handler());
        }
        candidates.push(&unknown);

        let mut parsed = None;
        for handler in candidates {
            match handler.parse(data, offset, state) {
                Ok(result) => {
                    parsed = Some(result);
                    break;
                }
                Err(e) => {
                    debug!(offset, ?content_type, error = %e, "handler rejected bytes");
                }
            }
        }

        let Some((message, next)) = parsed else {
            debug!(offset, "no handler could parse the remaining bytes");
            break;
        };
        if next <= offset {
            panic!(
                "message parser did not advance at offset {offset} (kind {:?})",
                message.kind()
            );
        }
        debug!(kind = ?message.kind(), offset, next, "parsed message");
        after_message(&message, state);
        messages.push(message);
        offset = next;
    }
    messages
}
