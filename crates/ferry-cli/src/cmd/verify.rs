use crate::cmd::{load_config, runtime};
use crate::output::{or_dash, print_fields, print_json, print_table};
use anyhow::Context;
use clap::Args;
use ferry_core::endpoints::Endpoints;
use ferry_core::verify::{SampleStatus, VerificationResult, Verifier};
use std::path::Path;

#[derive(Args, Debug, Clone, Default)]
pub struct VerifyArgs {
    /// Rows to sample per kind [default: verify.sample_size]
    #[arg(long, value_name = "N")]
    pub sample_size: Option<usize>,

    /// Seed for the sample; reuse a printed seed to replay a check
    #[arg(long, value_name = "U64")]
    pub seed: Option<u64>,
}

pub fn run(config_path: &Path, args: VerifyArgs, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, false)?;
    let sample_size = args.sample_size.unwrap_or(config.verify.sample_size);

    let rt = runtime()?;
    let result = rt.block_on(async {
        let endpoints = Endpoints::connect(&config)
            .await
            .context("failed to open catalog or stores")?;
        Verifier::new(endpoints.catalog, endpoints.destination)
            .verify(sample_size, args.seed)
            .await
            .context("verification failed")
    })?;

    if json {
        print_json(&result)?;
    } else {
        print_result(&result);
    }

    if !result.is_clean() {
        anyhow::bail!(
            "verification found {} missing, {} size mismatches, {} errors (seed {})",
            result.missing,
            result.size_mismatch,
            result.errors.len(),
            result.seed
        );
    }
    Ok(())
}

fn print_result(result: &VerificationResult) {
    print_fields(&[
        ("seed", result.seed.to_string()),
        ("sample size", result.sample_size.to_string()),
        ("checked", result.total_checked.to_string()),
        ("ok", result.successful.to_string()),
        ("missing", result.missing.to_string()),
        ("size mismatch", result.size_mismatch.to_string()),
        ("errors", result.errors.len().to_string()),
    ]);

    let problems: Vec<Vec<String>> = result
        .samples
        .iter()
        .filter(|s| s.status != SampleStatus::Ok)
        .map(|s| {
            let status = match s.status {
                SampleStatus::Ok => "ok",
                SampleStatus::Missing => "missing",
                SampleStatus::SizeMismatch => "size mismatch",
                SampleStatus::Error => "error",
            };
            vec![
                s.kind.to_string(),
                s.id.clone(),
                or_dash(s.key.as_ref()),
                status.to_string(),
                s.error.clone().unwrap_or_else(|| match (s.expected_size, s.actual_size) {
                    (Some(e), Some(a)) => format!("expected {e} bytes, found {a}"),
                    _ => String::new(),
                }),
            ]
        })
        .collect();
    if !problems.is_empty() {
        println!();
        print_table(&["KIND", "ID", "KEY", "STATUS", "DETAIL"], problems);
    }
}
