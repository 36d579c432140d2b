use super::{Annotation, AnnotationError};
use crate::constants::{PLACEHOLDER_CAPTION, PLACEHOLDER_DESCRIPTION, PLACEHOLDER_LOCATION};
use serde::Deserialize;

const MAX_FACTS: usize = 3;

// Shape the model is asked to produce. Every key is optional at this level so
// that missing narrative fields can be defaulted instead of failing the response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnnotation {
    location_name: Option<String>,
    location: Option<String>,
    caption: Option<String>,
    description: Option<String>,
    fact1: Option<String>,
    fact2: Option<String>,
    fact3: Option<String>,
}

/// Removes a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Slice holding the single JSON object in a free-form reply.
fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Decodes the model reply into an [`Annotation`].
///
/// `locationName` is required; a reply without it, or without a JSON object at all,
/// is [`AnnotationError::Malformed`]. The other fields fall back to fixed placeholders.
/// A supplied `place_hint` replaces whatever location the model returned.
pub fn parse_annotation(text: &str, place_hint: Option<&str>) -> Result<Annotation, AnnotationError> {
    let unfenced = strip_code_fence(text);
    let object = json_object(unfenced)
        .ok_or_else(|| AnnotationError::Malformed("no JSON object in reply".to_string()))?;
    let raw: RawAnnotation =
        serde_json::from_str(object).map_err(|e| AnnotationError::Malformed(e.to_string()))?;

    let landmark_name = non_blank(raw.location_name)
        .ok_or_else(|| AnnotationError::Malformed("missing locationName".to_string()))?;

    let place_label = match place_hint {
        Some(hint) => hint.to_string(),
        None => non_blank(raw.location).unwrap_or_else(|| PLACEHOLDER_LOCATION.to_string()),
    };

    let facts = [raw.fact1, raw.fact2, raw.fact3]
        .into_iter()
        .filter_map(non_blank)
        .take(MAX_FACTS)
        .collect();

    Ok(Annotation {
        landmark_name,
        place_label: Some(place_label),
        caption: non_blank(raw.caption).unwrap_or_else(|| PLACEHOLDER_CAPTION.to_string()),
        description: non_blank(raw.description)
            .unwrap_or_else(|| PLACEHOLDER_DESCRIPTION.to_string()),
        facts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "locationName": "Eiffel Tower",
        "location": "Paris, France",
        "caption": "Iron lattice at golden hour",
        "description": "The tower seen from the Champ de Mars.",
        "fact1": "Completed in 1889.",
        "fact2": "It is 330 metres tall.",
        "fact3": "It is repainted every seven years."
    }"#;

    #[test]
    fn test_parses_complete_reply() {
        let annotation = parse_annotation(FULL, None).unwrap();

        assert_eq!(annotation.landmark_name, "Eiffel Tower");
        assert_eq!(annotation.place_label.as_deref(), Some("Paris, France"));
        assert_eq!(annotation.caption, "Iron lattice at golden hour");
        assert_eq!(annotation.facts.len(), 3);
        assert_eq!(annotation.facts[0], "Completed in 1889.");
    }

    #[test]
    fn test_strips_markdown_fence() {
        let fenced = format!("```json\n{}\n```", FULL);
        let annotation = parse_annotation(&fenced, None).unwrap();
        assert_eq!(annotation.landmark_name, "Eiffel Tower");

        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_finds_object_inside_chatter() {
        let chatty = format!("Sure! Here is the result:\n{}\nHope this helps.", FULL);
        let annotation = parse_annotation(&chatty, None).unwrap();
        assert_eq!(annotation.landmark_name, "Eiffel Tower");
    }

    #[test]
    fn test_hint_overrides_model_location() {
        let annotation = parse_annotation(FULL, Some("7th Arrondissement, France")).unwrap();
        assert_eq!(
            annotation.place_label.as_deref(),
            Some("7th Arrondissement, France")
        );
    }

    #[test]
    fn test_missing_optional_fields_get_placeholders() {
        let annotation = parse_annotation(r#"{"locationName": "Colosseum"}"#, None).unwrap();

        assert_eq!(annotation.place_label.as_deref(), Some(PLACEHOLDER_LOCATION));
        assert_eq!(annotation.caption, PLACEHOLDER_CAPTION);
        assert_eq!(annotation.description, PLACEHOLDER_DESCRIPTION);
        assert!(annotation.facts.is_empty());
    }

    #[test]
    fn test_blank_facts_are_dropped() {
        let reply = r#"{"locationName": "Colosseum", "fact1": " ", "fact2": "Built under Vespasian."}"#;
        let annotation = parse_annotation(reply, None).unwrap();
        assert_eq!(annotation.facts, vec!["Built under Vespasian.".to_string()]);
    }

    #[test]
    fn test_malformed_replies() {
        assert!(matches!(
            parse_annotation("I cannot identify this image.", None),
            Err(AnnotationError::Malformed(_))
        ));
        assert!(matches!(
            parse_annotation(r#"{"location": "Rome, Italy"}"#, None),
            Err(AnnotationError::Malformed(_))
        ));
        assert!(matches!(
            parse_annotation(r#"{"locationName": "  "}"#, None),
            Err(AnnotationError::Malformed(_))
        ));
        assert!(matches!(
            parse_annotation("{not json}", None),
            Err(AnnotationError::Malformed(_))
        ));
    }
}
