use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_request_defaults_fill_in() {
    let request: ToolRequest =
        serde_json::from_value(json!({ "find_elements": { "selector": ".item" } })).unwrap();
    assert_eq!(
        request,
        ToolRequest::FindElements {
            selector: ".item".to_string(),
            options: SummaryOptions::default(),
            limit: 50,
            offset: 0,
        }
    );

    let request: ToolRequest = serde_json::from_value(json!({
        "wait_for_element": { "selector": "#spinner", "state": "hidden", "timeout_ms": 500 }
    }))
    .unwrap();
    assert_eq!(
        request,
        ToolRequest::WaitForElement {
            selector: "#spinner".to_string(),
            state: WaitState::Hidden,
            timeout_ms: Some(500),
        }
    );
}

#[test]
fn test_flattened_options() {
    let request: ToolRequest = serde_json::from_value(json!({
        "explore_page": { "max_depth": 2, "visible_only": false }
    }))
    .unwrap();
    assert_eq!(
        request,
        ToolRequest::ExplorePage {
            options: SummaryOptions {
                max_depth: 2,
                max_children: 10,
                visible_only: false,
            }
        }
    );

    let request: ToolRequest = serde_json::from_value(json!({
        "network_requests": { "limit": 5, "resource_type": "xhr" }
    }))
    .unwrap();
    match request {
        ToolRequest::NetworkRequests {
            query,
            resource_type,
        } => {
            assert_eq!(query.limit, 5);
            assert_eq!(query.offset, 0);
            assert_eq!(resource_type, Some(ResourceType::Xhr));
        }
        other => panic!("unexpected request {:?}", other),
    }
}

#[test]
fn test_unit_requests_are_bare_strings() {
    assert_eq!(serde_json::to_value(ToolRequest::Ping).unwrap(), json!("ping"));
    let request: ToolRequest = serde_json::from_str("\"shutdown\"").unwrap();
    assert_eq!(request, ToolRequest::Shutdown);
    assert_eq!(request.name(), "shutdown");
}

#[test]
fn test_error_response_shape() {
    let response: ToolResponse = BrowserError::PreconditionViolation {
        operation: "click_on_element",
    }
    .into();
    assert!(response.is_error());
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "error": {
                "message": "click_on_element requires a running browser session",
                "exit_code": 6
            }
        })
    );
}

#[test]
fn test_response_snapshot() {
    let response = ToolResponse::Snapshot(Some(ElementSnapshot {
        tag: "button".to_string(),
        text: "Save".to_string(),
        id: Some("save".to_string()),
        class: None,
        r#type: Some("submit".to_string()),
        selector: "#save".to_string(),
        children: vec![],
    }));
    insta::assert_json_snapshot!(response, @r###"
    {
      "snapshot": {
        "tag": "button",
        "text": "Save",
        "id": "save",
        "type": "submit",
        "selector": "#save",
        "children": []
      }
    }
    "###);
}
