use crate::lexer::*;

#[test]
fn test_tokenize_keywords_any_case() {
    let tokens = tokenize("INSERT into Select as").unwrap();
    assert!(matches!(tokens[0].token, Token::Insert));
    assert!(matches!(tokens[1].token, Token::Into));
    assert!(matches!(tokens[2].token, Token::Select));
    assert!(matches!(tokens[3].token, Token::As));
    assert!(matches!(tokens[4].token, Token::Eof));
}

#[test]
fn test_tokenize_identifiers() {
    let tokens = tokenize("device234 dev_1 iot-sensor-9 assets").unwrap();
    assert!(matches!(&tokens[0].token, Token::Identifier(s) if s == "device234"));
    assert!(matches!(&tokens[1].token, Token::Identifier(s) if s == "dev_1"));
    assert!(matches!(&tokens[2].token, Token::Identifier(s) if s == "iot-sensor-9"));
    assert!(matches!(&tokens[3].token, Token::Identifier(s) if s == "assets"));
}

#[test]
fn test_tokenize_literals() {
    let tokens = tokenize(r#"42 3.5 "on" 'off' true null"#).unwrap();
    assert!(matches!(tokens[0].token, Token::IntLiteral(42)));
    assert!(matches!(tokens[1].token, Token::FloatLiteral(f) if f == 3.5));
    assert!(matches!(&tokens[2].token, Token::StringLiteral(s) if s == "on"));
    assert!(matches!(&tokens[3].token, Token::StringLiteral(s) if s == "off"));
    assert!(matches!(tokens[4].token, Token::True));
    assert!(matches!(tokens[5].token, Token::Null));
}

#[test]
fn test_tokenize_path_and_offsets() {
    let tokens = tokenize("a.b[0]").unwrap();
    let kinds: Vec<_> = tokens.iter().map(|t| t.token.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            Token::Identifier("a".into()),
            Token::Dot,
            Token::Identifier("b".into()),
            Token::LBracket,
            Token::IntLiteral(0),
            Token::RBracket,
            Token::Eof,
        ]
    );
    assert_eq!(tokens[2].offset, 2);
}

#[test]
fn test_tokenize_rejects_unknown_characters() {
    let err = tokenize("insert into a select b.c ; drop").unwrap_err();
    assert!(matches!(err, twin_types::TqlError::Lex { offset: 25, .. }));
}
