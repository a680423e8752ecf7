#[cfg(test)]
mod tests {
    use crate::daemon::*;
    use crate::protocol::{ToolRequest, ToolResponse};
    use serde_json::json;

    #[test]
    fn test_socket_path() {
        let path = Daemon::get_socket_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "pagetap-daemon.sock");
        assert!(Daemon::get_socket_name().is_ok());
    }

    #[test]
    fn test_request_line_is_single_json_line() {
        let request = ToolRequest::Fill {
            selector: "textarea".to_string(),
            value: "line one\nline two".to_string(),
            timeout_ms: None,
        };
        let line = serde_json::to_string(&request).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(serde_json::from_str::<ToolRequest>(&line).unwrap(), request);
    }

    #[test]
    fn test_response_wire_format() {
        let response = ToolResponse::Bool(false);
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({ "bool": false }));
        assert_eq!(
            serde_json::to_value(ToolResponse::Pong).unwrap(),
            json!("pong")
        );
    }
}
