use super::protocol::{MessageType, WireMessage};

/// Normalize every line ending to CRLF: collapse existing CRLF to LF first
/// so already-correct input passes through unchanged.
pub fn norm_crlf(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Outbound middleware: stream payload fields are normalized to CRLF on
/// their way to the transport. Other fields are untouched.
pub fn normalize_message(mut msg: WireMessage) -> WireMessage {
    match msg.message_type {
        MessageType::InputStream => msg.input_stream = norm_crlf(&msg.input_stream),
        MessageType::OutputStream => msg.output_stream = norm_crlf(&msg.output_stream),
        MessageType::ErrorStream => msg.error_stream = norm_crlf(&msg.error_stream),
        _ => {}
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_newlines_become_crlf() {
        assert_eq!(norm_crlf("a\nb\n"), "a\r\nb\r\n");
    }

    #[test]
    fn existing_crlf_is_untouched() {
        assert_eq!(norm_crlf("a\r\nb\r\n"), "a\r\nb\r\n");
        assert_eq!(norm_crlf("mixed\nand\r\ndone"), "mixed\r\nand\r\ndone");
    }

    #[test]
    fn no_newlines_no_change() {
        assert_eq!(norm_crlf("plain"), "plain");
        assert_eq!(norm_crlf(""), "");
    }

    #[test]
    fn only_stream_fields_are_normalized() {
        let mut msg = WireMessage::new(MessageType::OutputStream);
        msg.output_stream = "line\n".into();
        msg.command = "echo\n".into();
        let normalized = normalize_message(msg);
        assert_eq!(normalized.output_stream, "line\r\n");
        assert_eq!(normalized.command, "echo\n");

        let mut msg = WireMessage::new(MessageType::ErrorStream);
        msg.error_stream = "oops\n".into();
        assert_eq!(normalize_message(msg).error_stream, "oops\r\n");
    }
}
