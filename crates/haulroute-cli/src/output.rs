//! Rendering of engine results for the terminal.

use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;

use haulroute_lib::{GraphHealth, ResolvedLocation, RouteResult, RouteSource, RoutingFailure};

/// How command results are printed on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One pretty-printed JSON document.
    Json,
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)
}

/// Render a computed route.
pub fn write_route<W: Write>(out: &mut W, route: &RouteResult, format: OutputFormat) -> io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, route);
    }

    let source = match route.source {
        RouteSource::Local => "local graph",
        RouteSource::Oracle => "routing oracle",
    };
    writeln!(
        out,
        "Route ({} jumps, profile: {}, via {source}):",
        route.hop_count, route.profile
    )?;
    for step in &route.path {
        writeln!(
            out,
            "- {} ({}) [{} {:.1}]",
            step.name, step.system_id, step.class, step.security
        )?;
    }

    if !route.class_counts.is_empty() {
        let tallies: Vec<String> = route
            .class_counts
            .iter()
            .map(|(class, count)| format!("{class}: {count}"))
            .collect();
        writeln!(out, "Security: {}", tallies.join(", "))?;
    }
    for rule in &route.soft_rules_hit {
        match &rule.reason {
            Some(reason) => writeln!(out, "Avoidance rule {} crossed: {reason}", rule.id)?,
            None => writeln!(out, "Avoidance rule {} crossed", rule.id)?,
        }
    }
    if !route.acknowledgements_required.is_empty() {
        let classes: Vec<&str> = route
            .acknowledgements_required
            .iter()
            .map(|class| class.as_str())
            .collect();
        writeln!(out, "Acknowledgement required for: {}", classes.join(", "))?;
    }
    if let Some(report) = &route.backfill {
        writeln!(
            out,
            "Backfilled {} systems and {} gates",
            report.nodes_inserted, report.edges_inserted
        )?;
    }
    Ok(())
}

/// Render a routing failure: reason code first, then detail.
pub fn write_failure<W: Write>(
    out: &mut W,
    failure: &RoutingFailure,
    format: OutputFormat,
) -> io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, failure);
    }

    writeln!(out, "error[{}]: {}", failure.reason, failure.message)?;
    if !failure.context.candidates.is_empty() {
        writeln!(out, "Candidates:")?;
        for candidate in &failure.context.candidates {
            writeln!(out, "  - {candidate}")?;
        }
    }
    if let Some(health) = &failure.context.graph_health {
        writeln!(out, "Graph: {}", health_line(health))?;
    }
    Ok(())
}

pub fn write_health<W: Write>(
    out: &mut W,
    health: &GraphHealth,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => write_json(out, health),
        OutputFormat::Text => writeln!(out, "{}", health_line(health)),
    }
}

pub fn write_resolved<W: Write>(
    out: &mut W,
    resolved: &ResolvedLocation,
    format: OutputFormat,
) -> io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, resolved);
    }
    match resolved.location_id {
        Some(location_id) => writeln!(
            out,
            "{} -> system {} (location {location_id})",
            resolved.matched_name, resolved.system_id
        ),
        None => writeln!(out, "{} -> system {}", resolved.matched_name, resolved.system_id),
    }
}

fn health_line(health: &GraphHealth) -> String {
    let status = match health.reason {
        None => "ready".to_string(),
        Some(reason) => format!("not ready ({})", reason.as_str()),
    };
    format!(
        "{status}: {} systems, {} gates",
        health.node_count, health.edge_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use haulroute_lib::{HealthReason, ReasonCode};

    fn render<F: FnOnce(&mut Vec<u8>) -> io::Result<()>>(f: F) -> String {
        let mut buffer = Vec::new();
        f(&mut buffer).expect("write to buffer");
        String::from_utf8(buffer).expect("utf8 output")
    }

    #[test]
    fn failure_text_leads_with_reason_code_and_lists_candidates() {
        let failure = RoutingFailure::new(ReasonCode::AmbiguousName, "'Jit' is ambiguous")
            .with_candidates(vec!["Jita".to_string(), "Jitterbug".to_string()]);
        let text = render(|out| write_failure(out, &failure, OutputFormat::Text));

        assert!(text.starts_with("error[ambiguous_name]: 'Jit' is ambiguous"));
        assert!(text.contains("  - Jita\n"));
        assert!(text.contains("  - Jitterbug\n"));
    }

    #[test]
    fn health_text_names_the_reason() {
        let health = GraphHealth {
            node_count: 3,
            edge_count: 0,
            ready: false,
            reason: Some(HealthReason::GraphEmpty),
        };
        let text = render(|out| write_health(out, &health, OutputFormat::Text));
        assert_eq!(text, "not ready (graph_empty): 3 systems, 0 gates\n");
    }

    #[test]
    fn health_json_uses_snake_case_reason() {
        let health = GraphHealth {
            node_count: 10,
            edge_count: 9,
            ready: true,
            reason: None,
        };
        let json = render(|out| write_health(out, &health, OutputFormat::Json));
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["ready"], true);
        assert!(value.get("reason").is_none());
    }
}
