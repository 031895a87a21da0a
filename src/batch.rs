//! Running one submission against many test cases.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::JudgeError;
use crate::judge::Judge;
use crate::types::{
    BatchRequest, BatchResponse, BatchSummary, ExecuteRequest, JobStatus, TestCase, Verdict,
};

pub const REDACTED: &str = "[hidden]";
pub const MAX_TEST_CASES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Sample run: everything stays visible.
    Run,
    /// Graded submission: details are hidden unless every case passes.
    Submit,
}

pub struct BatchRunner {
    judge: Arc<Judge>,
    case_delay: Duration,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(judge: Arc<Judge>, config: &AppConfig) -> Self {
        Self::with_options(
            judge,
            Duration::from_millis(config.batch_case_delay_ms),
            config.batch_concurrency,
        )
    }

    pub fn with_options(judge: Arc<Judge>, case_delay: Duration, concurrency: usize) -> Self {
        Self {
            judge,
            case_delay,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run_all(
        &self,
        request: BatchRequest,
        mode: BatchMode,
    ) -> Result<BatchResponse, JudgeError> {
        let cases = request.test_cases.unwrap_or_default();
        if cases.is_empty() {
            return Err(JudgeError::BadRequest(
                "At least one test case is required".to_string(),
            ));
        }
        if cases.len() > MAX_TEST_CASES {
            return Err(JudgeError::BadRequest(format!(
                "At most {} test cases are allowed",
                MAX_TEST_CASES
            )));
        }

        let template = ExecuteRequest {
            language: request.language,
            code: request.code,
            input: None,
            timeout: request.timeout_per_case,
        };
        // Reject bad submissions before any case runs.
        for case in &cases {
            self.judge.admit(ExecuteRequest {
                input: Some(case.input.clone()),
                ..template.clone()
            })?;
        }

        tracing::info!(
            cases = cases.len(),
            mode = ?mode,
            concurrency = self.concurrency,
            "batch started"
        );

        let mut results = if self.concurrency == 1 {
            self.run_sequential(&template, cases).await
        } else {
            self.run_pooled(&template, cases).await
        };

        let passed = results.iter().filter(|v| v.passed).count();
        let summary = BatchSummary {
            passed,
            total: results.len(),
        };

        if mode == BatchMode::Submit && summary.passed != summary.total {
            results.iter_mut().for_each(redact);
        }

        tracing::info!(passed = summary.passed, total = summary.total, "batch finished");
        Ok(BatchResponse { results, summary })
    }

    async fn run_sequential(&self, template: &ExecuteRequest, cases: Vec<TestCase>) -> Vec<Verdict> {
        let mut verdicts = Vec::with_capacity(cases.len());
        let mut compile_error: Option<String> = None;

        for (index, case) in cases.into_iter().enumerate() {
            if let Some(error) = &compile_error {
                verdicts.push(Verdict {
                    test_case_index: index,
                    input: case.input,
                    expected_output: case.expected_output,
                    actual_output: String::new(),
                    passed: false,
                    error: Some(error.clone()),
                });
                continue;
            }

            if index > 0 && !self.case_delay.is_zero() {
                tokio::time::sleep(self.case_delay).await;
            }

            let (verdict, status) = self.run_case(template, index, case).await;
            if status == Some(JobStatus::CompileFailed) {
                compile_error = verdict.error.clone();
            }
            verdicts.push(verdict);
        }

        verdicts
    }

    async fn run_pooled(&self, template: &ExecuteRequest, cases: Vec<TestCase>) -> Vec<Verdict> {
        stream::iter(cases.into_iter().enumerate())
            .map(|(index, case)| self.run_case(template, index, case))
            .buffered(self.concurrency)
            .map(|(verdict, _)| verdict)
            .collect()
            .await
    }

    async fn run_case(
        &self,
        template: &ExecuteRequest,
        index: usize,
        case: TestCase,
    ) -> (Verdict, Option<JobStatus>) {
        let request = ExecuteRequest {
            input: Some(case.input.clone()),
            ..template.clone()
        };

        match self.judge.execute(request).await {
            Ok(response) => {
                let passed =
                    response.success && outputs_match(&case.expected_output, &response.output);
                tracing::debug!(case = index, passed, status = response.status.as_str(), "case finished");
                (
                    Verdict {
                        test_case_index: index,
                        input: case.input,
                        expected_output: case.expected_output,
                        actual_output: response.output,
                        passed,
                        error: response.error,
                    },
                    Some(response.status),
                )
            }
            Err(e) => (
                Verdict {
                    test_case_index: index,
                    input: case.input,
                    expected_output: case.expected_output,
                    actual_output: String::new(),
                    passed: false,
                    error: Some(e.to_string()),
                },
                None,
            ),
        }
    }
}

fn redact(verdict: &mut Verdict) {
    verdict.expected_output = REDACTED.to_string();
    verdict.actual_output = REDACTED.to_string();
    if verdict.error.is_some() {
        verdict.error = Some(REDACTED.to_string());
    }
}

/// Structural comparison when both sides parse as literals, otherwise a
/// whitespace-normalised text comparison.
pub fn outputs_match(expected: &str, actual: &str) -> bool {
    match (parse_literal(expected), parse_literal(actual)) {
        (Some(expected), Some(actual)) => values_equal(&expected, &actual),
        _ => normalize(expected) == normalize(actual),
    }
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn parse_literal(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text)
        .ok()
        .or_else(|| serde_json::from_str(&pythonish_to_json(text)?).ok())
}

/// Rewrites Python-style literals (`'a'`, `True`, `None`, `(1, 2)`) as JSON.
fn pythonish_to_json(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                out.push('"');
                loop {
                    match chars.next()? {
                        '\\' => {
                            let escaped = chars.next()?;
                            if escaped == '\'' {
                                out.push('\'');
                            } else {
                                out.push('\\');
                                out.push(escaped);
                            }
                        }
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            '"' => {
                out.push('"');
                loop {
                    let next = chars.next()?;
                    out.push(next);
                    if next == '\\' {
                        out.push(chars.next()?);
                    } else if next == '"' {
                        break;
                    }
                }
            }
            '(' => out.push('['),
            ')' => out.push(']'),
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    _ => out.push_str(&word),
                }
            }
            _ => out.push(c),
        }
    }

    Some(out)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // integers compare exactly; f64 would merge values above 2^53
        (Value::Number(x), Value::Number(y)) if !x.is_f64() && !y.is_f64() => x == y,
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= f64::EPSILON * x.abs().max(y.abs()).max(1.0),
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}
