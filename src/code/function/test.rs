use super::*;

#[test]
fn unprocessed_function_has_no_blocks() {
    let f = Function {
        name: "f".to_string(),
        range: 0x1000..0x1010,
        load_offset: 0,
        blocks: None,
    };
    assert!(!f.is_processed());
}

#[test]
fn processed_function_is_immutable_from_then_on() {
    let f = Function {
        name: "f".to_string(),
        range: 0x1000..0x1010,
        load_offset: 0,
        blocks: Some(Vec::new()),
    };
    assert!(f.is_processed());
}
