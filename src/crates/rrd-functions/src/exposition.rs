//! Textual exposition of registered functions.
//!
//! The JSON renderers take caller-chosen quote characters so the output
//! can be embedded inside differently-escaped outer documents, plus a base
//! tab depth for pretty-printing. Quoting is applied uniformly by one
//! writer, never concatenated ad hoc at call sites.

use crate::collections::HashSet;
use std::collections::HashMap;
use crate::descriptor::FunctionDescriptor;
use crate::registry::HostFunctions;

/// Formatting options for JSON exposition.
#[derive(Debug, Clone, Copy)]
pub struct JsonOptions {
    /// Character wrapping object keys
    pub key_quote: char,
    /// Character wrapping string values
    pub string_quote: char,
    /// Base indentation depth, in tabs
    pub tabs: usize,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            key_quote: '"',
            string_quote: '"',
            tabs: 0,
        }
    }
}

fn push_indent(sink: &mut String, tabs: usize) {
    for _ in 0..tabs {
        sink.push('\t');
    }
}

/// Write `value` wrapped in `quote`, escaping backslashes and the quote
/// character itself.
fn push_quoted(sink: &mut String, quote: char, value: &str) {
    sink.push(quote);
    for ch in value.chars() {
        if ch == quote || ch == '\\' {
            sink.push('\\');
        }
        sink.push(ch);
    }
    sink.push(quote);
}

fn write_functions_object(sink: &mut String, descriptors: &[FunctionDescriptor], opts: &JsonOptions) {
    if descriptors.is_empty() {
        sink.push_str("{}");
        return;
    }

    sink.push_str("{\n");

    let last = descriptors.len() - 1;
    for (i, descriptor) in descriptors.iter().enumerate() {
        push_indent(sink, opts.tabs + 1);
        push_quoted(sink, opts.key_quote, &descriptor.name);
        sink.push_str(": {\n");

        push_indent(sink, opts.tabs + 2);
        push_quoted(sink, opts.key_quote, "help");
        sink.push_str(": ");
        push_quoted(sink, opts.string_quote, &descriptor.help);
        sink.push_str(",\n");

        push_indent(sink, opts.tabs + 2);
        push_quoted(sink, opts.key_quote, "timeout");
        sink.push_str(": ");
        sink.push_str(&descriptor.timeout.as_secs().to_string());
        sink.push_str(",\n");

        push_indent(sink, opts.tabs + 2);
        push_quoted(sink, opts.key_quote, "format");
        sink.push_str(": ");
        push_quoted(sink, opts.string_quote, &descriptor.format);
        sink.push_str(",\n");

        push_indent(sink, opts.tabs + 2);
        push_quoted(sink, opts.key_quote, "sync");
        sink.push_str(": ");
        sink.push_str(if descriptor.synchronous { "true" } else { "false" });
        sink.push('\n');

        push_indent(sink, opts.tabs + 1);
        sink.push('}');
        if i != last {
            sink.push(',');
        }
        sink.push('\n');
    }

    push_indent(sink, opts.tabs);
    sink.push('}');
}

/// Render one chart's functions as a JSON object keyed by function name.
/// A chart with no registered functions renders as `{}`.
pub fn chart_functions_to_json(
    host: &HostFunctions,
    chart: &str,
    sink: &mut String,
    opts: &JsonOptions,
) {
    let descriptors = host
        .chart_scope(chart)
        .map(|store| store.snapshot())
        .unwrap_or_default();
    write_functions_object(sink, &descriptors, opts);
}

/// Render every function visible on the host as one JSON object.
///
/// Chart-scoped descriptors are collected first, so a host-scoped function
/// shadowed by a more specific scope is not duplicated. Entries are sorted
/// by name.
pub fn host_functions_to_json(host: &HostFunctions, sink: &mut String, opts: &JsonOptions) {
    let mut seen: HashSet<String> = HashSet::default();
    let mut merged: Vec<FunctionDescriptor> = Vec::new();

    for (_, store) in host.chart_scopes() {
        for descriptor in store.snapshot() {
            if seen.insert(descriptor.name.clone()) {
                merged.push(descriptor);
            }
        }
    }

    for descriptor in host.host_scope().snapshot() {
        if seen.insert(descriptor.name.clone()) {
            merged.push(descriptor);
        }
    }

    merged.sort_by(|a, b| a.name.cmp(&b.name));
    write_functions_object(sink, &merged, opts);
}

/// Populate an externally owned map with one `name -> help` entry per
/// function registered on the chart. Takes a plain std map so callers
/// outside this crate can supply their own.
pub fn chart_functions_to_dict(
    host: &HostFunctions,
    chart: &str,
    dict: &mut HashMap<String, String>,
) {
    let Some(store) = host.chart_scope(chart) else {
        return;
    };

    for descriptor in store.snapshot() {
        dict.insert(descriptor.name, descriptor.help);
    }
}

fn push_function_line(sink: &mut String, descriptor: &FunctionDescriptor) {
    sink.push_str("FUNCTION ");
    push_quoted(sink, '"', &descriptor.name);
    sink.push(' ');
    sink.push_str(&descriptor.timeout.as_secs().to_string());
    sink.push(' ');
    push_quoted(sink, '"', &descriptor.help);
    sink.push('\n');
}

/// Advertise one chart-scoped function as a plugin-protocol `FUNCTION`
/// line, for embedding in chart metadata responses.
pub fn expose_function(host: &HostFunctions, chart: &str, name: &str, sink: &mut String) {
    let Some(store) = host.chart_scope(chart) else {
        return;
    };

    if let Some(descriptor) = store.snapshot().iter().find(|d| d.name == name) {
        push_function_line(sink, descriptor);
    }
}

/// Advertise every chart-scoped function as plugin-protocol `FUNCTION`
/// lines, one per function.
pub fn expose_functions(host: &HostFunctions, chart: &str, sink: &mut String) {
    let Some(store) = host.chart_scope(chart) else {
        return;
    };

    for descriptor in store.snapshot() {
        push_function_line(sink, &descriptor);
    }
}
