//! Prompt assembly.
//!
//! Layout: instructions, output format, a file map flagging every context
//! file as inline or attached, the inline contents in a canonical delimited
//! form, and (only when something overflowed) a pointer at the attachment
//! search tool.

use std::path::PathBuf;

pub const ATTACHMENT_HINT: &str = "Additional context files are attached to this request. \
Search them with the search_session_attachments tool.";

pub fn assemble(
    instructions: &str,
    output_format: &str,
    inline: &[(PathBuf, String)],
    attached: &[PathBuf],
) -> String {
    let mut out = String::new();

    out.push_str("# Task\n\n");
    out.push_str(instructions.trim());
    out.push('\n');

    if !output_format.trim().is_empty() {
        out.push_str("\n# Output format\n\n");
        out.push_str(output_format.trim());
        out.push('\n');
    }

    if !inline.is_empty() || !attached.is_empty() {
        out.push_str("\n# File map\n\n");
        for (path, _) in inline {
            out.push_str(&format!("- {} (inline)\n", path.display()));
        }
        for path in attached {
            out.push_str(&format!("- {} (attached)\n", path.display()));
        }
    }

    if !inline.is_empty() {
        out.push_str("\n# Inline files\n");
        for (path, content) in inline {
            out.push_str(&format!("\n=== begin file: {} ===\n", path.display()));
            out.push_str(content);
            if !content.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&format!("=== end file: {} ===\n", path.display()));
        }
    }

    if !attached.is_empty() {
        out.push('\n');
        out.push_str(ATTACHMENT_HINT);
        out.push('\n');
    }

    out
}
