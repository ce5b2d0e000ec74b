//! Grounded prompt assembly.
//!
//! A thin, deterministic string template: the ranked chunks become
//! numbered "Source N" sections and the model is instructed to answer
//! only from them. With an empty selection the prompt explicitly tells
//! the model to say the information is not available — the generation
//! step still runs, it must not be skipped or left to hallucinate.

use crate::ranker::SelectedChunk;

/// Render the grounded prompt for a query over the selected context.
pub fn render(selected: &[SelectedChunk], query: &str) -> String {
    if selected.is_empty() {
        return format!(
            "You are a technical assistant.\n\
             No relevant documentation was found for the user's question.\n\
             \n\
             User Question:\n\
             {}\n\
             \n\
             Answer:\n\
             State clearly that the information is not available in the provided documents.\n",
            query
        );
    }

    let context = selected
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let title = chunk
                .section_title
                .as_deref()
                .map(|t| format!("Section: {}\n", t))
                .unwrap_or_default();
            format!("### Source {}\n{}{}", i + 1, title, chunk.chunk_text)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a senior technical assistant.\n\
         \n\
         Answer the user's question using **only** the information from the sources below.\n\
         If the answer is not present in the sources, say: \"The provided documents do not contain this information.\"\n\
         \n\
         {}\n\
         \n\
         ---\n\
         \n\
         User Question:\n\
         {}\n\
         \n\
         Answer:\n\
         Provide a clear, precise answer.\n\
         Cite sources using [Source X] notation.\n",
        context, query
    )
}
