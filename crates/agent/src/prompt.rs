//! Renders the system prompt the model answers against: the response
//! contract, the intent table from the registry, and the assembled context.
//!
//! The model is strictly a translator here. It classifies and extracts; it
//! never decides prices or stock levels, which only ever come from the
//! catalog block.

use merchat_core::intent::Intent;

use crate::context::AssembledContext;

pub fn build_system_prompt(context: &AssembledContext) -> String {
    let mut prompt = String::from(
        "You are a customer service assistant for a commerce business.\n\
         Answer the customer's latest message using ONLY the context below.\n\
         Prices and stock quantities must come from the catalog block; the\n\
         knowledge base block is supplementary and approximate.\n\n\
         Respond with a single JSON object, no surrounding prose:\n\
         {\"intent\": \"<label>\", \"confidence\": <0.0-1.0>,\n\
          \"final_answer\": \"<message to the customer>\",\n\
          \"webhook_data\": {<action fields, omit for plain questions>}}\n\n\
         Supported intents:\n",
    );

    for intent in Intent::ALL {
        let schema = intent.schema();
        prompt.push_str(&format!("- {}", intent.as_str()));
        if schema.requires_action {
            prompt.push_str(&format!(": requires {}", schema.required.join(", ")));
            if !schema.optional.is_empty() {
                prompt.push_str(&format!("; optional {}", schema.optional.join(", ")));
            }
        } else {
            prompt.push_str(": no webhook_data");
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "\nSet \"complete\": false inside webhook_data while required fields\n\
         are still missing, and use final_answer to ask for exactly what is\n\
         missing. Never invent customer contact details.\n",
    );

    if !context.combined.is_empty() {
        prompt.push_str("\n--- CONTEXT ---\n");
        prompt.push_str(&context.combined);
        prompt.push('\n');
    }

    prompt
}
