//! The fixed extraction contract sent to the vision model.
//!
//! The instruction and the canonical column names live together because the
//! normaliser relies on the model having been told to use exactly these
//! names: a column the prompt asks for is a column the consolidated table
//! always carries.

/// Canonical bill-of-materials columns, in display order.
///
/// material, description, dimension/unit, quantity, unit weight (kg),
/// total weight (kg).
pub const CANONICAL_COLUMNS: [&str; 6] = [
    "material",
    "descricao",
    "dimensoes_unidade",
    "qtd",
    "peso_unidade_kg",
    "peso_total_kg",
];

/// Label used when the model does not name its table.
pub const DEFAULT_TABLE_NAME: &str = "extracted_table";

/// System instruction for every extraction call.
///
/// The envelope shape here is what [`crate::pipeline::normalize`] expects.
pub const EXTRACTION_PROMPT: &str = r#"You are a generic TABLE extractor. The image is a cropped region of a scanned engineering document containing one or more tables (typically a bill of materials).

Respond STRICTLY with JSON in this envelope and nothing else:

{"tables":[{"name":"<table title>","columns_detected":["<header>", ...],"rows":[{...}, ...]}]}

Rules:
1. One object per table in "tables"; one object per table row in "rows".
2. Map header synonyms onto these canonical field names:
   material, descricao (description), dimensoes_unidade (dimension/unit),
   qtd (quantity), peso_unidade_kg (unit weight in kg), peso_total_kg (total weight in kg).
   Keep any other column under its own header name.
3. Use null for any field that is absent or unreadable.
4. Copy values as printed; do not compute or infer missing values.
5. No prose, no explanations, no Markdown code fences outside the JSON."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_canonical_column() {
        for col in CANONICAL_COLUMNS {
            assert!(EXTRACTION_PROMPT.contains(col), "prompt is missing {col}");
        }
    }

    #[test]
    fn prompt_describes_envelope() {
        assert!(EXTRACTION_PROMPT.contains(r#"{"tables":[{"name""#));
        assert!(EXTRACTION_PROMPT.contains("columns_detected"));
    }
}
