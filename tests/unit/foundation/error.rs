use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        GlmuxError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        GlmuxError::unsupported("drawThing")
            .to_string()
            .contains("unsupported operation: 'drawThing'")
    );
    assert!(
        GlmuxError::forbidden("clear")
            .to_string()
            .contains("forbidden operation: 'clear'")
    );
    assert!(
        GlmuxError::UnknownHandle { key: 7 }
            .to_string()
            .contains("unknown handle: 7")
    );
    assert!(
        GlmuxError::ParticipantTimeout {
            client: ClientId(3)
        }
        .to_string()
        .contains("participant timeout: client 3")
    );
    assert!(
        GlmuxError::serde("x")
            .to_string()
            .contains("serialization error:")
    );
}

#[test]
fn serde_json_errors_convert() {
    let err = serde_json::from_str::<u32>("nope").unwrap_err();
    let e: GlmuxError = err.into();
    assert!(matches!(e, GlmuxError::Serde(_)));
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = GlmuxError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
