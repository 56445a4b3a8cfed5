use anyhow::Result;
use attention::{CrossAttentionConfig, SelfAttentionConfig};

#[test]
fn self_attention_config_round_trips_through_json() -> Result<()> {
    let config = SelfAttentionConfig::new(64, 16, 16, 4);
    let json = serde_json::to_string(&config)?;
    let parsed: SelfAttentionConfig = serde_json::from_str(&json)?;
    assert_eq!(parsed, config);
    Ok(())
}

#[test]
fn cross_attention_config_parses_all_fields() -> Result<()> {
    let parsed: CrossAttentionConfig = serde_json::from_str(
        r#"{"in_dim1": 32, "in_dim2": 48, "k_dim": 8, "v_dim": 12, "num_heads": 4}"#,
    )?;
    assert_eq!(parsed, CrossAttentionConfig::new(32, 48, 8, 12, 4));
    parsed.validate()?;
    Ok(())
}

#[test]
fn unknown_and_missing_fields_are_rejected() {
    let unknown = serde_json::from_str::<SelfAttentionConfig>(
        r#"{"in_dim": 8, "k_dim": 4, "v_dim": 4, "num_heads": 2, "dropout": 0.1}"#,
    );
    assert!(unknown.is_err());

    let missing = serde_json::from_str::<SelfAttentionConfig>(r#"{"in_dim": 8, "k_dim": 4}"#);
    assert!(missing.is_err());
}
