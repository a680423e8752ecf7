#[cfg(test)]
mod tests {
    use crate::commands::output::{to_json, to_simple};
    use crate::commands::tool::{QueryArgs, SummaryArgs, ToolCommands};
    use crate::protocol::{ToolRequest, ToolResponse};
    use crate::query::EventQuery;
    use crate::summarizer::SummaryOptions;
    use crate::types::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn snapshot() -> ElementSnapshot {
        ElementSnapshot {
            tag: "ul".to_string(),
            text: String::new(),
            id: Some("menu".to_string()),
            class: None,
            r#type: None,
            selector: "#menu".to_string(),
            children: vec![ElementSnapshot {
                tag: "li".to_string(),
                text: "Home".to_string(),
                id: None,
                class: Some("item active".to_string()),
                r#type: None,
                selector: "ul > li.item.active:nth-child(1)".to_string(),
                children: vec![],
            }],
        }
    }

    #[test]
    fn test_summary_args_map_to_options() {
        let options: SummaryOptions = SummaryArgs {
            max_depth: 3,
            max_children: 5,
            include_hidden: true,
        }
        .into();
        assert_eq!(options.max_depth, 3);
        assert_eq!(options.max_children, 5);
        assert!(!options.visible_only);
    }

    #[test]
    fn test_query_args_map_to_query() {
        let from = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let query: EventQuery = QueryArgs {
            limit: 2,
            offset: 1,
            from: Some(from),
            to: None,
        }
        .into();
        assert_eq!(query.limit, 2);
        assert_eq!(query.offset, 1);
        assert_eq!(query.time_from, Some(from));
        assert_eq!(query.time_to, None);
    }

    #[test]
    fn test_eval_arg_is_parsed_as_json() {
        let request = ToolCommands::Eval {
            script: "return arg.n * 2".to_string(),
            arg: Some("{\"n\": 21}".to_string()),
        }
        .into_request()
        .unwrap();
        assert_eq!(
            request,
            ToolRequest::ExecuteJs {
                script: "return arg.n * 2".to_string(),
                arg: json!({ "n": 21 }),
            }
        );

        let bad = ToolCommands::Eval {
            script: "return 1".to_string(),
            arg: Some("{not json".to_string()),
        }
        .into_request();
        assert!(bad.is_err());
    }

    #[test]
    fn test_json_output_unwraps_payload() {
        assert_eq!(
            to_json(&ToolResponse::Bool(false)).unwrap(),
            json!({ "success": false })
        );
        assert_eq!(
            to_json(&ToolResponse::Text("Hello".to_string())).unwrap(),
            json!({ "text": "Hello" })
        );
        assert_eq!(to_json(&ToolResponse::Snapshot(None)).unwrap(), json!(null));
    }

    #[test]
    fn test_simple_snapshot_tree() {
        let text = to_simple(&ToolResponse::Snapshot(Some(snapshot())));
        assert_eq!(
            text,
            "ul#menu  [#menu]\n  li.item.active \"Home\"  [ul > li.item.active:nth-child(1)]"
        );
    }

    #[test]
    fn test_simple_console_lines() {
        let entry = ConsoleLogEntry {
            level: ConsoleLevel::Error,
            text: "boom".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 1, 0).unwrap(),
            location: None,
        };
        assert_eq!(
            to_simple(&ToolResponse::ConsoleLogs(vec![entry])),
            "[2024-05-01T10:01:00+00:00] error: boom"
        );
    }
}
