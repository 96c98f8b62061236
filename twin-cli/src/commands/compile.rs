use anyhow::{Context, Result};
use twin_tql::CompiledRule;

/// Print the target, sources and watched keys of a rule as JSON
pub fn compile_rule(tql: &str) -> Result<()> {
    let rule = CompiledRule::new(tql).with_context(|| format!("compile {tql:?}"))?;
    println!("{}", serde_json::to_string_pretty(&rule.summary())?);
    Ok(())
}
