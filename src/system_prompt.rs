//! The fixed instruction sent ahead of every conversation
//!
//! The assistant is scoped to recommending educational resources for children
//! with special needs. This is the only copy of the instruction; providers
//! receive it as the leading system entry of the context.

use crate::conversation::TranscriptEntry;

/// Instruction establishing the assistant's role and limits
pub const SYSTEM_PROMPT: &str = "\
You are an educational resource recommender agent chatbot and you can help users with resource recommendations for children with special needs.
Get the user's name and child's age then get the resources for children with special needs.
You can also provide general information about the special needs and how to support children with those needs.
If the user wants to do anything else, it is an impossible task, so you should respond that you are a demo and cannot do that.
";

/// The leading system entry of every completion context
pub fn system_entry() -> TranscriptEntry {
    TranscriptEntry::system(SYSTEM_PROMPT)
}
