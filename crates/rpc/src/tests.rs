use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

use super::*;

#[test]
fn request_envelope_shape() {
	let request = CallRequest::new("c-1", "Echo", "ping")
		.args([json!(1), json!("two")])
		.kwargs(json!({"loud": true}).as_object().cloned().unwrap());

	let wire: Value = serde_json::from_slice(&encode_request(&request).unwrap()).unwrap();
	assert_eq!(
		wire,
		json!({
			"id": "c-1",
			"method": "Echo->ping",
			"params": [1, "two"],
			"ex_params": {"loud": true},
		})
	);
}

#[test]
fn expire_at_is_written_only_when_set() {
	let mut request = CallRequest::new("c-2", "Echo", "ping");
	request.expire_at = Some(UNIX_EPOCH + Duration::from_millis(1_500));

	let wire: Value = serde_json::from_slice(&encode_request(&request).unwrap()).unwrap();
	assert_eq!(wire["expire_at"], json!(1.5));

	let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();
	assert_eq!(decoded, request);
}

#[test]
fn decode_request_rejects_method_without_class() {
	let err = decode_request(br#"{"id": "x", "method": "ping"}"#).unwrap_err();
	assert!(matches!(err, ProtocolError::InvalidMethod(ref m) if m == "ping"));
}

#[test]
fn result_reply_decodes_to_success() {
	let response = decode_response(br#"{"id": "a", "result": "pong"}"#).unwrap();
	assert_eq!(response, CallResponse::ok("a", json!("pong")));
}

#[test]
fn explicit_and_missing_null_results_are_success() {
	assert_eq!(
		decode_response(br#"{"id": "a", "result": null}"#).unwrap().outcome,
		Ok(Value::Null)
	);
	assert_eq!(decode_response(br#"{"id": "a"}"#).unwrap().outcome, Ok(Value::Null));
	assert_eq!(
		decode_response(br#"{"id": "a", "result": 3, "error": null}"#).unwrap().outcome,
		Ok(json!(3))
	);
	assert_eq!(
		decode_response(br#"{"id": "a", "result": 3, "error": {}}"#).unwrap().outcome,
		Ok(json!(3))
	);
}

#[test]
fn falsy_error_fields_are_success() {
	for error in ["null", "false", "0", "0.0", "\"\"", "[]", "{}"] {
		let wire = format!(r#"{{"id": "a", "result": 5, "error": {error}}}"#);
		assert_eq!(
			decode_response(wire.as_bytes()).unwrap().outcome,
			Ok(json!(5)),
			"error field {error}"
		);
	}
}

#[test]
fn zero_error_code_gets_application_error() {
	let response = decode_response(br#"{"id": "a", "error": {"message": "nope", "code": 0}}"#).unwrap();
	assert_eq!(response.outcome, Err(ErrorInfo::new("nope", None)));
}

#[test]
fn error_without_code_gets_application_error() {
	let response = decode_response(br#"{"id": "a", "error": {"message": "bad args"}}"#).unwrap();
	assert_eq!(response.outcome, Err(ErrorInfo::new("bad args", None)));
	assert_eq!(response.outcome.unwrap_err().code, APPLICATION_ERROR);
}

#[test]
fn error_code_is_kept_when_present() {
	let response = decode_response(br#"{"id": "a", "error": {"message": "nope", "code": 404}}"#).unwrap();
	assert_eq!(response.outcome, Err(ErrorInfo { message: "nope".into(), code: 404 }));
}

#[test]
fn bare_string_error_is_a_message() {
	let response = decode_response(br#"{"id": "a", "error": "boom"}"#).unwrap();
	assert_eq!(response.outcome, Err(ErrorInfo::new("boom", None)));
}

#[test]
fn malformed_envelopes_are_protocol_errors() {
	assert!(matches!(decode_response(b"not json"), Err(ProtocolError::Json(_))));
	assert!(matches!(decode_response(b"[1, 2]"), Err(ProtocolError::NotAnObject)));
	assert!(matches!(decode_response(br#"{"result": 1}"#), Err(ProtocolError::MissingId)));
	assert!(matches!(decode_response(br#"{"id": 7, "result": 1}"#), Err(ProtocolError::MissingId)));
	assert!(matches!(
		decode_response(br#"{"id": "a", "error": 12}"#),
		Err(ProtocolError::MalformedError(_))
	));
}

#[test]
fn encoded_error_response_decodes_back() {
	let response = CallResponse::err("z", ErrorInfo::new("denied", Some(-1)));
	assert_eq!(decode_response(&encode_response(&response).unwrap()).unwrap(), response);
}

#[test]
fn split_method_requires_both_sides() {
	assert_eq!(split_method("Echo->ping").unwrap(), ("Echo", "ping"));
	assert!(split_method("->ping").is_err());
	assert!(split_method("Echo->").is_err());
	assert_eq!(join_method("A", "b"), "A->b");
}

#[test]
fn ids_are_unique_across_threads() {
	let ids = Arc::new(IdGen::new());
	let handles: Vec<_> = (0..4)
		.map(|_| {
			let ids = Arc::clone(&ids);
			std::thread::spawn(move || (0..1000).map(|_| ids.next()).collect::<Vec<_>>())
		})
		.collect();

	let mut seen = HashSet::new();
	for handle in handles {
		for id in handle.join().unwrap() {
			assert!(seen.insert(id), "duplicate id");
		}
	}
	assert_eq!(seen.len(), 4000);
}

#[test]
fn generators_use_distinct_prefixes() {
	let a = IdGen::new();
	let b = IdGen::new();
	assert_ne!(a.prefix(), b.prefix());
	assert_eq!(IdGen::with_prefix("p").next(), "p-0");
}

proptest! {
	#[test]
	fn request_envelope_preserves_arguments(
		class in "[A-Z][a-zA-Z]{0,8}",
		method in "[a-z_]{1,8}",
		args in prop::collection::vec(any::<i64>(), 0..6),
	) {
		let request = CallRequest::new("p-1", class, method).args(args.iter().map(|n| json!(n)));
		let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();
		prop_assert_eq!(decoded, request);
	}
}
