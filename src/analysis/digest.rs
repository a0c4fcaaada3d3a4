//! Plain-text rendering of a report, compact enough to hand to a language
//! model or paste into a ticket.

use std::fmt::Write;

use super::report::AnalysisReport;
use crate::schema::SchemaNode;

const NO_BODY: &str = "-";

fn label(schema: Option<&SchemaNode>) -> String {
    schema.map_or_else(|| NO_BODY.to_string(), SchemaNode::type_label)
}

impl AnalysisReport {
    /// Renders the report as a line-oriented digest.
    pub fn render_digest(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_digest(&mut out);
        out
    }

    fn write_digest(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "# {}", self.host)?;
        let window = match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => format!(" from {} to {}", first.to_rfc3339(), last.to_rfc3339()),
            _ => String::new(),
        };
        writeln!(out, "{} exchange(s){}", self.exchange_count, window)?;
        if !self.complete {
            writeln!(out, "PARTIAL: analysis was cancelled before the end of the input")?;
        }
        if self.undecodable_exchanges > 0 {
            writeln!(out, "{} exchange(s) with undecodable bodies", self.undecodable_exchanges)?;
        }
        if !self.protocols.is_empty() {
            let mix: Vec<String> = self
                .protocols
                .iter()
                .map(|(protocol, count)| format!("{} {}", protocol, count))
                .collect();
            writeln!(out, "protocols: {}", mix.join(", "))?;
        }
        if let Some(auth) = self.authentication {
            writeln!(out, "authentication: {}", auth)?;
        }
        if !self.common_headers.is_empty() {
            writeln!(out, "common headers:")?;
            for (name, value) in &self.common_headers {
                writeln!(out, "  {}: {}", name, value)?;
            }
        }

        if !self.endpoints.is_empty() {
            writeln!(out, "\n## endpoints ({})", self.endpoints.len())?;
            for endpoint in &self.endpoints {
                let statuses: Vec<String> = endpoint
                    .status_codes
                    .iter()
                    .map(|(code, count)| format!("{}x{}", code, count))
                    .collect();
                writeln!(
                    out,
                    "{} {}  samples={} paths={} status=[{}]",
                    endpoint.method,
                    endpoint.template,
                    endpoint.sample_count,
                    endpoint.distinct_paths,
                    statuses.join(" ")
                )?;
                if !endpoint.query_params.is_empty() {
                    let names: Vec<&str> = endpoint.query_params.iter().map(String::as_str).collect();
                    writeln!(out, "  query: {}", names.join(", "))?;
                }
                writeln!(
                    out,
                    "  request: {}  response: {}",
                    label(endpoint.request_schema.as_ref()),
                    label(endpoint.response_schema.as_ref())
                )?;
                if endpoint.undecodable_samples > 0 {
                    writeln!(out, "  body undecodable in {} sample(s)", endpoint.undecodable_samples)?;
                }
            }
        }

        if !self.rpc_groups.is_empty() {
            writeln!(out, "\n## rpc ({})", self.rpc_groups.len())?;
            for group in &self.rpc_groups {
                let endpoints: Vec<&str> = group.endpoints.iter().map(String::as_str).collect();
                writeln!(
                    out,
                    "{} {}  calls={} errors={} confidence={:?} via {}",
                    group.protocol,
                    group.rpc_method,
                    group.call_count,
                    group.error_count,
                    group.confidence,
                    endpoints.join(", ")
                )?;
                writeln!(
                    out,
                    "  request: {}  response: {}",
                    label(group.request_schema.as_ref()),
                    label(group.response_schema.as_ref())
                )?;
            }
        }

        let stats = &self.session_stats;
        if stats.count > 0 {
            writeln!(out, "\n## sessions ({})", stats.count)?;
            writeln!(
                out,
                "duration mean={:.0}s max={}s, exchanges mean={:.1} max={}",
                stats.mean_duration_secs, stats.max_duration_secs, stats.mean_exchanges, stats.max_exchanges
            )?;
        }

        if !self.flow_counts.is_empty() {
            writeln!(out, "\n## flows ({})", self.flows.len())?;
            for (name, count) in &self.flow_counts {
                writeln!(out, "{}  detected={} successful={}", name, count.detected, count.successful)?;
            }
        }
        Ok(())
    }
}
