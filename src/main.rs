use formstate::constraint::ConstraintMap;
use formstate::intent::IntentKind;
use formstate::validate::ConstraintError;
use formstate::{
    parse_submission, ConstraintValidator, FormConfig, FormEntry, FormError, FormState,
    SubmissionResult, Value,
};
use serde::Deserialize;
use std::io::{self, Read};
use tracing_subscriber::prelude::*;

/// One reconciliation round, read from stdin.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    #[serde(default)]
    config: FormConfig,
    #[serde(default)]
    default_value: Value,
    last_result: Option<SubmissionResult>,
    #[serde(default)]
    entries: Vec<(String, Value)>,
    #[serde(default)]
    constraints: ConstraintMap,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Form(#[from] FormError),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            CliError::Io(_) => "io",
            CliError::Json(_) => "invalid-request",
            CliError::Form(err) => err.code(),
            CliError::Constraint(ConstraintError::Name(err)) => err.code(),
            CliError::Constraint(ConstraintError::Pattern { .. }) => "invalid-constraint",
        }
    }
}

fn run(input: &str) -> Result<String, CliError> {
    let request: Request = serde_json::from_str(input)?;

    let entries = request
        .entries
        .into_iter()
        .map(|(name, value)| FormEntry::try_from(value).map(|entry| (name, entry)))
        .collect::<Result<Vec<_>, _>>()?;

    let state = FormState::initialize(request.default_value, request.last_result.as_ref())?;
    let submission = parse_submission(entries, &request.config)?;
    let mut next = state.apply_submission(&submission)?;

    if submission.kind() != IntentKind::Reset && !request.constraints.is_empty() {
        let validator = ConstraintValidator::new(request.constraints);
        let error = validator.check(next.value())?;
        next = next.merge_validation(submission.intent.as_ref(), error);
    }

    Ok(serde_json::to_string_pretty(&next)?)
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut input = String::new();
    let result = io::stdin()
        .read_to_string(&mut input)
        .map_err(CliError::from)
        .and_then(|_| run(&input));

    match result {
        Ok(output) => println!("{}", output),
        Err(err) => {
            eprintln!("{}: {}", err.code(), err);
            std::process::exit(1);
        }
    }
}
