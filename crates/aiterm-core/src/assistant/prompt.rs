use super::snapshot::ContextSnapshot;

/// Fixed instruction every system prompt starts with.
pub const PREAMBLE: &str = "You are AITerm, an intelligent terminal assistant. You help users with:
- Terminal commands and shell scripting
- Code analysis and debugging
- Development workflows

You can see the user's terminal context and can suggest commands, explain errors, and describe how to automate tasks.";

/// Build the system instruction for a query.
///
/// Sections appear in a fixed order (directory, output, commands,
/// selection) and only when the snapshot carries that field.
pub fn build_system_prompt(context: Option<&ContextSnapshot>) -> String {
    let mut sections = vec![PREAMBLE.to_string()];

    if let Some(context) = context {
        if let Some(ref dir) = context.working_directory {
            sections.push(format!("Current directory: {}", dir));
        }
        if let Some(ref output) = context.recent_output {
            sections.push(format!("Recent terminal output:\n{}", output));
        }
        if let Some(ref commands) = context.recent_commands {
            if !commands.is_empty() {
                sections.push(format!("Recent commands:\n{}", commands.join("\n")));
            }
        }
        if let Some(ref selected) = context.selected_text {
            sections.push(format!("Selected text:\n{}", selected));
        }
    }

    sections.join("\n\n")
}
