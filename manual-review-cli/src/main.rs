use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use manual_review_core::{
    AssignRequest, EvaluatorId, NextReviewRequest, ReviewClient, ScoringMethod, StepKey,
    StudentKey, SubmitRequest, UnitId, UpsertStaffRequest, UpsertStudentRequest,
    UpsertUnitRequest, WriteReviewRequest,
};
use serde_json::Value;

/// Manual review: administer review assignments on a running service
#[derive(Parser, Debug)]
#[command(name = "manual-review")]
#[command(about = "Administer manual review assignments", long_about = None)]
struct Cli {
    /// Base URL of the review service
    #[arg(long, global = true, default_value = "http://localhost:3000")]
    server: String,

    /// Admin token (if not provided, will use MANUAL_REVIEW_TOKEN environment variable)
    #[arg(long, global = true, env = "MANUAL_REVIEW_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update a course staff member
    AddStaff(AddStaffArgs),
    /// Create or update a unit's review settings
    SetUnit(SetUnitArgs),
    /// Create or update a student record
    AddStudent(AddStudentArgs),
    /// Record a submission and send it for evaluation
    Submit(SubmitArgs),
    /// Assign evaluators to a submission
    Assign(AssignArgs),
    /// Remove a review step
    Remove(StepArgs),
    /// Expire a review step
    Expire(StepArgs),
    /// Hand an evaluator a new submission to review
    Next(NextArgs),
    /// Save review contents for a step
    Write(WriteArgs),
    /// Show a review step
    ShowStep(StepArgs),
    /// Show step counts per unit
    Status,
    /// Run a batch job (assign_review, reassign_review, calculate_final_score,
    /// fix_missing_manual_evaluation_summary, fix_num_assigned, expire_reviews)
    RunJob(RunJobArgs),
}

#[derive(Parser, Debug)]
struct AddStaffArgs {
    user_id: String,

    #[arg(long)]
    email: String,

    /// Exclude this staff member from grading
    #[arg(long)]
    no_grade: bool,

    #[arg(long)]
    can_override: bool,
}

#[derive(Parser, Debug)]
struct SetUnitArgs {
    unit_id: String,

    #[arg(long)]
    title: String,

    /// Number of evaluators each submission needs
    #[arg(long, default_value_t = 1)]
    num_reviewers: u32,

    /// How completed review scores combine into the final score
    #[arg(long, default_value = "average", value_parser = ["average", "min", "max"])]
    scoring: String,
}

#[derive(Parser, Debug)]
struct AddStudentArgs {
    key: String,

    #[arg(long)]
    email: String,
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    unit_id: String,
    reviewee: String,

    /// Submission contents as JSON
    #[arg(long)]
    contents: Option<String>,
}

#[derive(Parser, Debug)]
struct AssignArgs {
    unit_id: String,
    reviewee: String,

    /// Assign this evaluator instead of the least loaded ones
    #[arg(long)]
    evaluator: Option<String>,
}

#[derive(Parser, Debug)]
struct StepArgs {
    /// Step key (unit:reviewee:evaluator)
    step_key: String,
}

#[derive(Parser, Debug)]
struct NextArgs {
    unit_id: String,
    evaluator: String,
}

#[derive(Parser, Debug)]
struct WriteArgs {
    step_key: String,

    #[arg(long)]
    comments: Option<String>,

    #[arg(long)]
    score: Option<f64>,

    /// Mark the review as completed
    #[arg(long)]
    complete: bool,
}

#[derive(Parser, Debug)]
struct RunJobArgs {
    job: String,
}

fn parse_scoring(value: &str) -> Result<ScoringMethod> {
    value.parse().map_err(|e: String| anyhow!(e))
}

fn parse_contents(contents: Option<&str>) -> Result<Value> {
    match contents {
        Some(text) => serde_json::from_str(text).context("--contents must be valid JSON"),
        None => Ok(Value::Null),
    }
}

async fn run(client: &ReviewClient, command: Commands) -> Result<Value> {
    match command {
        Commands::AddStaff(args) => {
            let request = UpsertStaffRequest {
                email: args.email,
                can_grade: !args.no_grade,
                can_override: args.can_override,
            };
            client
                .put_staff(&EvaluatorId::from(args.user_id), &request)
                .await
        }
        Commands::SetUnit(args) => {
            let request = UpsertUnitRequest {
                title: args.title,
                num_reviewers: args.num_reviewers,
                scoring_method: parse_scoring(&args.scoring)?,
            };
            client.put_unit(&UnitId::from(args.unit_id), &request).await
        }
        Commands::AddStudent(args) => {
            let request = UpsertStudentRequest { email: args.email };
            client
                .put_student(&StudentKey::from(args.key), &request)
                .await
        }
        Commands::Submit(args) => {
            let request = SubmitRequest {
                unit_id: UnitId::from(args.unit_id),
                reviewee_key: StudentKey::from(args.reviewee),
                contents: parse_contents(args.contents.as_deref())?,
            };
            client.submit(&request).await
        }
        Commands::Assign(args) => {
            let request = AssignRequest {
                unit_id: UnitId::from(args.unit_id),
                reviewee_key: StudentKey::from(args.reviewee),
                evaluator_id: args.evaluator.map(EvaluatorId::from),
            };
            client.assign(&request).await
        }
        Commands::Remove(args) => client.remove_step(&StepKey::from(args.step_key)).await,
        Commands::Expire(args) => client.expire_step(&StepKey::from(args.step_key)).await,
        Commands::Next(args) => {
            let request = NextReviewRequest {
                unit_id: UnitId::from(args.unit_id),
                evaluator_id: EvaluatorId::from(args.evaluator),
            };
            client.next_review(&request).await
        }
        Commands::Write(args) => {
            let request = WriteReviewRequest {
                comments: args.comments,
                score: args.score,
                mark_completed: args.complete,
            };
            client
                .write_review(&StepKey::from(args.step_key), &request)
                .await
        }
        Commands::ShowStep(args) => client.get_step(&StepKey::from(args.step_key)).await,
        Commands::Status => client.status().await,
        Commands::RunJob(args) => client.run_job(&args.job).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;
    let client = ReviewClient::new(http, &cli.server, cli.token);

    let response = run(&client, cli.command).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to format response")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scoring() {
        assert_eq!(parse_scoring("min").unwrap(), ScoringMethod::Min);
        assert_eq!(parse_scoring("AVERAGE").unwrap(), ScoringMethod::Average);
        assert!(parse_scoring("median").is_err());
    }

    #[test]
    fn test_parse_contents() {
        assert_eq!(parse_contents(None).unwrap(), Value::Null);
        assert_eq!(
            parse_contents(Some(r#"{"essay":"text"}"#)).unwrap()["essay"],
            "text"
        );
        assert!(parse_contents(Some("{")).is_err());
    }

    #[test]
    fn test_write_args() {
        let cli = Cli::try_parse_from([
            "manual-review",
            "--token",
            "t",
            "write",
            "u1:alice:bob",
            "--score",
            "0.5",
            "--complete",
        ])
        .unwrap();
        assert_eq!(cli.token.as_deref(), Some("t"));
        match cli.command {
            Commands::Write(args) => {
                assert_eq!(args.step_key, "u1:alice:bob");
                assert_eq!(args.score, Some(0.5));
                assert!(args.complete);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
