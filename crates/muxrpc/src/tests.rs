use serde_json::Value;
use serde_json::json;

use crate::*;

fn as_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("frame should be valid JSON")
}

// ============================================================================
//  REQUESTS
// ============================================================================

#[test]
fn test_request_wire_shape() {
    let request = Request::new(1, "add", json!([1, 2]), false);
    let wire = as_json(&request.encode().unwrap());

    assert_eq!(wire, json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "add",
        "params": [1, 2],
        "streamed": false,
    }));
}

#[test]
fn test_request_defaults_when_fields_absent() {
    let request = Request::decode(br#"{"id": 9, "method": "ping"}"#).unwrap();

    assert_eq!(request.version, PROTOCOL_VERSION);
    assert_eq!(request.params, Value::Null);
    assert!(!request.streamed);
}

#[test]
fn test_cancel_request_uses_sentinel() {
    let cancel = Request::cancel(7);

    assert!(cancel.is_cancel());
    assert!(!cancel.streamed);
    assert_eq!(cancel.method, CANCEL_STREAM_METHOD);
    assert_eq!(cancel.params, Value::Null);
    assert!(!Request::new(7, "cancel", Value::Null, false).is_cancel());
}

#[test]
fn test_request_version_number() {
    let request = Request::new(1, "m", Value::Null, false);
    assert_eq!(request.version_number(), Some(2.0));
    assert_eq!(request.clone().with_version("1.0").version_number(), Some(1.0));
    assert_eq!(request.clone().with_version(" 2.1 ").version_number(), Some(2.1));
    assert_eq!(request.clone().with_version("two").version_number(), None);
    assert_eq!(request.with_version("NaN").version_number(), None);
}

#[test]
fn test_request_without_id_is_rejected() {
    let err = Request::decode(br#"{"method": "add", "params": []}"#).unwrap_err();
    assert!(matches!(err, Error::Json(_)));
}

// ============================================================================
//  RESPONSES
// ============================================================================

#[test]
fn test_response_wire_shapes() {
    let result = as_json(&Response::result(1, json!(3)).encode().unwrap());
    assert_eq!(result, json!({"id": 1, "result": 3, "jsonrpc": "2.0"}));

    let error = as_json(&Response::error(Some(2), RpcError::method_not_found("no such method")).encode().unwrap());
    assert_eq!(error, json!({
        "id": 2,
        "error": {"code": -32601, "message": "no such method"},
        "jsonrpc": "2.0",
    }));

    let completed = as_json(&Response::completed(5).encode().unwrap());
    assert_eq!(completed, json!({"id": 5, "jsonrpc": "2.0"}));

    let orphan = as_json(&Response::error(None, RpcError::parse_error("bad frame")).encode().unwrap());
    assert_eq!(orphan["id"], Value::Null);
}

#[test]
fn test_response_decode_discrimination() {
    assert_eq!(
        Response::decode(br#"{"id": 5, "result": "a", "jsonrpc": "2.0"}"#).unwrap(),
        Response::result(5, json!("a")),
    );
    assert_eq!(
        Response::decode(br#"{"id": 5, "jsonrpc": "2.0"}"#).unwrap(),
        Response::completed(5),
    );
    assert_eq!(
        Response::decode(br#"{"id": 5, "error": {"code": -32000, "message": "boom"}}"#).unwrap(),
        Response::error(Some(5), RpcError::server_error("boom", 0)),
    );
}

#[test]
fn test_null_result_is_still_a_result() {
    let decoded = Response::decode(br#"{"id": 4, "result": null}"#).unwrap();
    assert_eq!(decoded, Response::result(4, Value::Null));
}

#[test]
fn test_response_decode_rejects_malformed_frames() {
    assert!(matches!(Response::decode(b"not json"), Err(Error::Json(_))));
    assert!(matches!(Response::decode(b"[1, 2, 3]"), Err(Error::NotAnObject)));
    assert!(matches!(Response::decode(br#"{"result": 1}"#), Err(Error::MissingField("id"))));
    assert!(matches!(Response::decode(br#"{"id": "one", "result": 1}"#), Err(Error::InvalidField { field: "id", .. })));
    assert!(matches!(Response::decode(br#"{"id": null, "result": 1}"#), Err(Error::InvalidField { field: "id", .. })));
}

#[test]
fn test_null_id_error_frame_decodes() {
    let decoded = Response::decode(br#"{"id": null, "error": {"code": -32700, "message": "bad"}}"#).unwrap();
    assert_eq!(decoded.id(), None);
    assert_eq!(decoded, Response::error(None, RpcError::parse_error("bad")));
}

#[test]
fn test_encode_with_version() {
    let wire = as_json(&Response::completed(3).encode_with_version("2.1").unwrap());
    assert_eq!(wire["jsonrpc"], json!("2.1"));
}

#[test]
fn test_peek_id() {
    assert_eq!(peek_id(br#"{"id": 12, "method": 5}"#), Some(12));
    assert_eq!(peek_id(br#"{"method": "x"}"#), None);
    assert_eq!(peek_id(b"garbage"), None);
}

// ============================================================================
//  ERROR CODES
// ============================================================================

#[test]
fn test_server_error_offsets() {
    assert_eq!(RpcError::server_error("x", 0).code, -32000);
    assert_eq!(RpcError::server_error("x", 5).code, -32005);
    assert_eq!(RpcError::server_error("x", 500).code, -32099);
    assert!(RpcError::server_error("x", 42).is_server_error());
    assert!(!RpcError::internal_error("x").is_server_error());
    assert!(RpcError::method_not_found("x").is_method_not_found());
}

#[test]
fn test_rpc_error_display() {
    let err = RpcError::invalid_request("duplicate request id");
    assert_eq!(err.to_string(), "duplicate request id (code -32600)");
}

#[test]
fn test_anyhow_interop() -> anyhow::Result<()> {
    let request = Request::decode(br#"{"id": 1, "method": "echo", "params": {"x": 1}}"#)?;
    assert_eq!(request.params["x"], json!(1));
    Ok(())
}
