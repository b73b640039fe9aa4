use super::Diagnostic;

pub fn render(d: &Diagnostic) -> String {
    let mut obj = serde_json::json!({
        "severity": "error",
        "message": d.message,
        "notes": d.notes,
    });

    if let Some(code) = d.code {
        obj["code"] = serde_json::Value::String(code.to_string());
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj).unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn render_basic_error() {
        let d = Diagnostic::error("invalid magic 0xcafebabe");
        let v = parse_json(&render(&d));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["message"], "invalid magic 0xcafebabe");
        assert!(v["notes"].as_array().unwrap().is_empty());
        assert!(v.get("code").is_none());
    }

    #[test]
    fn render_with_code_and_suggestion() {
        let d = Diagnostic::error("bad").with_code("IDK-F001").with_suggestion("try this instead");
        let v = parse_json(&render(&d));
        assert_eq!(v["code"], "IDK-F001");
        assert_eq!(v["suggestion"], "try this instead");
    }

    #[test]
    fn render_with_notes() {
        let d = Diagnostic::error("bad").with_note("first").with_note("second");
        let v = parse_json(&render(&d));
        let notes = v["notes"].as_array().unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0], "first");
    }

    #[test]
    fn render_no_suggestion_key_absent() {
        let v = parse_json(&render(&Diagnostic::error("bad")));
        assert!(v.get("suggestion").is_none());
    }

    #[test]
    fn render_is_single_line() {
        let d = Diagnostic::error("line one\nline two").with_note("note\nwith newline");
        let out = render(&d);
        assert!(!out.contains('\n'));
        parse_json(&out);
    }
}
