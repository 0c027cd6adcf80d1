//! Species extraction prompts.
//!
//! The model is asked for a bare JSON array with one object per species
//! observed in the paper.

/// System prompt for species observation extraction
pub const SYSTEM_PROMPT: &str = r#"You extract species observation records from ecological research papers.

Rules you MUST follow:
- Use ONLY the provided paper text. Do NOT invent species, counts or places.
- Report species as scientific names (Genus species) when the text gives them.
- Use "not specified" for abundance/biomass or counts the text does not report.
- Output MUST be a JSON array only (no prose, no markdown), for machine parsing.
- Output [] when the paper reports no species observations."#;

/// User prompt template for one paper
/// Placeholders: {text}
pub const USER_PROMPT_TEMPLATE: &str = r#"Extract species information from this research paper. Return ONLY a JSON array.

For each species in the study, extract:
- species: scientific name (Genus species)
- abundance_or_biomass: population data, density, biomass measurements
- number: specimen count or sample size
- location: study location or habitat

Return format:
[
  {
    "species": "Genus species",
    "abundance_or_biomass": "density/biomass data or not specified",
    "number": "count or not specified",
    "location": "location"
  }
]

Text: {text}"#;

/// Build user prompt around the (already truncated) paper text
pub fn build_user_prompt(text: &str) -> String {
    USER_PROMPT_TEMPLATE.replace("{text}", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_user_prompt() {
        let prompt = build_user_prompt("Myodes glareolus was trapped in {plots}.");
        assert!(prompt.ends_with("Text: Myodes glareolus was trapped in {plots}."));
        assert!(prompt.contains("Return ONLY a JSON array"));
    }
}
