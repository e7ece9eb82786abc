use super::{Outline, StoryMode, EXPRESSIONS};
use crate::config::CharacterConfig;

pub(crate) fn outline_prompt(topic: &str, mode: StoryMode) -> String {
    let brief = match mode {
        StoryMode::Food => format!(
            "a short, funny educational dialogue video about the food \"{}\". \
             Cover where it comes from, how it became popular, and one surprising fact.",
            topic
        ),
        StoryMode::Comedy => format!(
            "a short comedy skit on the theme \"{}\". \
             Build up an absurd situation and end on a punchline.",
            topic
        ),
    };

    format!(
        r#"You are planning {brief}

Write a four-part story outline. Return a JSON object with these fields:
- title: a catchy video title
- setup: how the story opens and what the characters want
- development: how the topic is explored or the situation escalates
- twist: the surprise or turning point
- conclusion: how it wraps up

Output ONLY valid JSON, with no other text."#
    )
}

pub(crate) fn script_prompt(
    topic: &str,
    mode: StoryMode,
    outline: &Outline,
    characters: &[CharacterConfig],
) -> String {
    let roster = characters
        .iter()
        .map(|c| {
            if c.persona.is_empty() {
                format!("- {} ({})", c.name, c.display_name)
            } else {
                format!("- {} ({}): {}", c.name, c.display_name, c.persona)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let outline_json = serde_json::to_string_pretty(outline).unwrap_or_default();
    let speakers = characters
        .iter()
        .map(|c| format!("\"{}\"", c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let expressions = EXPRESSIONS
        .iter()
        .map(|e| format!("\"{}\"", e))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Write the dialogue script for a {mode} video about "{topic}".

Characters:
{roster}

Outline:
{outline_json}

Split the script into four sections, one per outline part, each with 4 to 8 lines.
Return a JSON array. Each section has:
- title: short section title
- background: an English image prompt describing the scene behind the characters (no people, no text)
- segments: an array of lines, each with
  - speaker: one of {speakers}
  - text: the subtitle shown on screen (at most 60 characters)
  - expression: one of {expressions}
  - voice_text: the line as it should be read aloud (spell out numbers and symbols, no emoji)

Output ONLY valid JSON, with no other text."#
    )
}
