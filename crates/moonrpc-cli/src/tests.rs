use super::*;
use moonrpc_common::Request;
use moonrpc_server::Provider;

fn request(method: &str, args: Vec<Value>) -> Request {
    args.into_iter().fold(Request::new(ECHO_SERVICE, method), |request, arg| {
        request.with_arg(param_type_of(&arg), arg)
    })
}

#[test]
fn test_echo_service_methods() {
    let service = echo_service();
    assert_eq!(service.method_names(), vec!["add", "echo", "fail"]);

    let echoed = service.invoke(&request("echo", vec![json!("moon")]));
    assert_eq!(echoed.result, Some(json!("moon")));

    let sum = service.invoke(&request("add", vec![json!(2), json!(40)]));
    assert_eq!(sum.result, Some(json!(42)));
}

#[test]
fn test_fail_raises_business_error() {
    let response = echo_service().invoke(&request("fail", vec![json!("on purpose")]));
    let error = response.error.unwrap();
    assert!(error.is_business());
    assert_eq!(error.message, "on purpose");
}

#[test]
fn test_add_overflow_is_business_error() {
    let response = echo_service().invoke(&request("add", vec![json!(i64::MAX), json!(1)]));
    assert!(response.error.unwrap().is_business());
}

#[test]
fn test_param_types() {
    assert_eq!(param_type_of(&json!("x")), "String");
    assert_eq!(param_type_of(&json!(7)), "int");
    assert_eq!(param_type_of(&json!(1.5)), "double");
    assert_eq!(param_type_of(&json!(true)), "boolean");
    assert_eq!(param_type_of(&json!([1])), "List");
    assert_eq!(param_type_of(&json!({"a": 1})), "Object");
}

#[test]
fn test_parse_args_accepts_bare_words() {
    let raw = vec!["42".to_string(), "hello".to_string(), "\"quoted\"".to_string()];
    assert_eq!(parse_args(&raw), vec![json!(42), json!("hello"), json!("quoted")]);
}

#[test]
fn test_call_target() {
    let target = CallTarget::parse("direct://127.0.0.1:9100").unwrap();
    assert_eq!(target.interface, ECHO_SERVICE);
    assert_eq!(target.registry.port(), 9100);

    let target = CallTarget::parse("direct://127.0.0.1:9100/demo.Other").unwrap();
    assert_eq!(target.interface, "demo.Other");

    assert!(CallTarget::parse("moon://127.0.0.1:9100").is_err());
    assert!(CallTarget::parse("127.0.0.1:9100").is_err());
}

#[tokio::test]
async fn test_serve_then_call() {
    let mut service = serve("127.0.0.1:0", &[], 4).await.unwrap();
    let port = service.exported_url().unwrap().port();
    let target = CallTarget::parse(&format!("direct://127.0.0.1:{}", port)).unwrap();

    let echoed = call(&target, "echo", vec![json!("hi")], 1000, 0).await.unwrap();
    assert_eq!(echoed, json!("hi"));

    let sum = call(&target, "add", parse_args(&["2".into(), "3".into()]), 1000, 1).await.unwrap();
    assert_eq!(sum, json!(5));

    let err = call(&target, "fail", vec![json!("nope")], 1000, 2).await.unwrap_err();
    assert!(err.to_string().contains("nope"));

    service.unexport().await;
}

#[tokio::test]
async fn test_serve_rejects_bad_bind() {
    assert!(serve("not-an-address", &[], 4).await.is_err());
}
