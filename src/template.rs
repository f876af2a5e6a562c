// src/template.rs

//! Command template expansion.
//!
//! Templates use `%(name)s` placeholders, optionally with a signed offset for
//! the time-relative ones (`%(shortdate-1)s`, `%(unixtime+3600)s`). `%%`
//! produces a literal percent sign; any other `%` is passed through so shell
//! snippets such as `date +%s` keep working.
//!
//! Expansion happens exactly once, when an ActionRun is built.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use regex::{Captures, Regex};

use crate::errors::BuildError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%(?:\((?P<name>[A-Za-z_]+)(?P<offset>[+-]\d+)?\)s|(?P<pct>%))")
        .expect("placeholder regex is valid")
});

/// Values a command template can refer to.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub action_name: &'a str,
    pub job_name: &'a str,
    pub run_id: &'a str,
    pub node: &'a str,
    /// Scheduled time of the owning JobRun.
    pub run_time: DateTime<Utc>,
}

/// Expand every placeholder in `template`.
pub fn expand(template: &str, ctx: &TemplateContext<'_>) -> Result<String, BuildError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).expect("group 0 always matches");
        push_literal(&mut out, template, last, whole.start())?;
        out.push_str(&expand_one(&caps, ctx)?);
        last = whole.end();
    }
    push_literal(&mut out, template, last, template.len())?;

    Ok(out)
}

/// Copy `template[start..end]` verbatim, rejecting half-written placeholders.
fn push_literal(
    out: &mut String,
    template: &str,
    start: usize,
    end: usize,
) -> Result<(), BuildError> {
    let literal = &template[start..end];
    if let Some(pos) = literal.find("%(") {
        return Err(BuildError::MalformedTemplate(start + pos));
    }
    out.push_str(literal);
    Ok(())
}

fn expand_one(caps: &Captures<'_>, ctx: &TemplateContext<'_>) -> Result<String, BuildError> {
    if caps.name("pct").is_some() {
        return Ok("%".to_string());
    }

    let name = &caps["name"];
    let offset = match caps.name("offset") {
        Some(m) => Some(
            m.as_str()
                .parse::<i64>()
                .map_err(|_| BuildError::MalformedTemplate(m.start()))?,
        ),
        None => None,
    };

    let plain = |value: &str| match offset {
        Some(_) => Err(BuildError::OffsetNotAllowed(name.to_string())),
        None => Ok(value.to_string()),
    };

    match name {
        "actionname" => plain(ctx.action_name),
        "jobname" => plain(ctx.job_name),
        "runid" => plain(ctx.run_id),
        "node" => plain(ctx.node),
        "shortdate" => {
            let days = offset.unwrap_or(0);
            let date = TimeDelta::try_days(days)
                .and_then(|delta| ctx.run_time.date_naive().checked_add_signed(delta))
                .ok_or_else(|| out_of_range(name, days))?;
            Ok(date.format("%Y-%m-%d").to_string())
        }
        "unixtime" => {
            let secs = offset.unwrap_or(0);
            ctx.run_time
                .timestamp()
                .checked_add(secs)
                .map(|t| t.to_string())
                .ok_or_else(|| out_of_range(name, secs))
        }
        "daynumber" => {
            let days = offset.unwrap_or(0);
            i64::from(ctx.run_time.date_naive().num_days_from_ce())
                .checked_add(days)
                .map(|n| n.to_string())
                .ok_or_else(|| out_of_range(name, days))
        }
        other => Err(BuildError::UnknownPlaceholder(other.to_string())),
    }
}

fn out_of_range(name: &str, offset: i64) -> BuildError {
    BuildError::OffsetOutOfRange(format!("{name}{offset:+}"))
}
