//! List command handler

use super::resolve_run_config;
use crate::commands::ListArgs;
use crate::error::CliResult;
use fixturist::{discover_tests, FixtureLayout, TestCase};

/// Execute the list command
pub async fn execute_list(args: &ListArgs) -> CliResult<()> {
    let config = resolve_run_config(&args.overrides).await?;
    let tests = discover_tests(&config, &FixtureLayout::default()).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&tests)?);
    } else {
        print!("{}", render_table(&tests));
    }
    Ok(())
}

/// Render tests as aligned `name  input  output` columns
#[must_use]
pub fn render_table(tests: &[TestCase]) -> String {
    let name_width = tests.iter().map(|t| t.name.len()).max().unwrap_or(0);
    let input_width = tests.iter().map(|t| t.input.len()).max().unwrap_or(0);

    let mut out = String::new();
    for test in tests {
        out.push_str(&format!(
            "{:<name_width$}  {:<input_width$}  {}\n",
            test.name, test.input, test.output
        ));
    }
    out.push_str(&format!("{} test(s)\n", tests.len()));
    out
}
