//! System prompt assembly from the conversation context

use crate::context::ConversationContext;

/// Opening line of every system prompt unless configured otherwise
pub const DEFAULT_BASE_INSTRUCTION: &str = "You are an AI assistant helping with file management.";

/// Build the system prompt for one command.
///
/// Sections are joined by a blank line in a fixed order: base instruction,
/// workspace, selected files, last command. Absent parts are left out.
pub fn build_system_prompt(base_instruction: &str, context: &ConversationContext) -> String {
    let mut sections = vec![base_instruction.to_string()];

    if let Some(workspace) = &context.workspace_path {
        sections.push(format!("Current workspace: {}", workspace.display()));
    }

    if !context.selected_files.is_empty() {
        let files: Vec<String> = context
            .selected_files
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        sections.push(format!("Selected files:\n{}", files.join("\n")));
    }

    if let Some(command) = &context.last_command {
        sections.push(format!("Last command: {}", command));
    }

    sections.join("\n\n")
}
