//! Renders a toolkit into the tool-use instruction block appended to an
//! agent's system prompt.
//!
//! The instruction teaches the XML call format (CDATA-wrapped values, one
//! call per response) and lists every tool with its parameters and a worked
//! example.

use crate::base::{Tool, ToolParameter};
use crate::registry::Toolkit;

/// Build the complete tool instruction block for a toolkit.
///
/// Returns an empty string for an empty toolkit so callers can append
/// unconditionally.
pub fn generate_tool_instruction(toolkit: &Toolkit) -> String {
    if toolkit.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(
        "<tool_instructions>\n\
         ## Tool Usage\n\n\
         To use a tool, emit exactly ONE tool call per response in this format:\n\n\
         <tool_call>\n  \
           <name>tool_name</name>\n  \
           <params>\n    \
             <param_name><![CDATA[value]]></param_name>\n  \
           </params>\n\
         </tool_call>\n\n\
         Rules:\n\
         - Wrap every value in CDATA so special characters survive.\n\
         - At most one tool call per response; additional calls are ignored.\n\
         - After the tool runs you receive its result and continue.\n\
         - When you are done, respond with plain text and no tool call.\n\n\
         ## Available Tools\n\n",
    );

    for tool in toolkit.tools() {
        out.push_str(&format!("### {}\n{}\n", tool.name(), tool.description()));

        let params = tool.parameters();
        if params.is_empty() {
            out.push_str("Parameters: none\n");
        } else {
            out.push_str("Parameters:\n");
            for p in &params {
                let requirement = if p.required { "required" } else { "optional" };
                out.push_str(&format!(
                    "- `{}` ({}, {}): {}\n",
                    p.name, p.param_type, requirement, p.description
                ));
            }
        }

        out.push_str("Example:\n");
        out.push_str(&xml_example(tool.name(), &params));
        out.push('\n');
    }

    out.push_str("</tool_instructions>");
    out
}

/// A worked XML example for one tool.
fn xml_example(name: &str, params: &[ToolParameter]) -> String {
    let mut lines = Vec::new();

    for param in params {
        if param.param_type == "array" {
            lines.push(format!("    <{}>", param.name));
            lines.push("      <item><![CDATA[first value]]></item>".to_string());
            lines.push("      <item><![CDATA[second value]]></item>".to_string());
            lines.push(format!("    </{}>", param.name));
        } else {
            let value = match param.param_type {
                "integer" => "123".to_string(),
                "boolean" => "true".to_string(),
                _ => format!("your {} here", param.name),
            };
            lines.push(format!(
                "    <{0}><![CDATA[{1}]]></{0}>",
                param.name, value
            ));
        }
    }

    format!(
        "<tool_call>\n  <name>{name}</name>\n  <params>\n{}\n  </params>\n</tool_call>\n",
        lines.join("\n")
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
