use leafdoc_types::prelude::*;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    combinator::rest,
    sequence::separated_pair,
    IResult,
};

pub const SEPARATOR: &str = "___";
pub const UNKNOWN_CROP: &str = "Unknown";

/// Splits `"<Crop>___<Disease>"` into its display names.
///
/// Labels without a separator come back with an [`UNKNOWN_CROP`] crop and the
/// whole label as the disease.
pub fn parse(label: &ClassLabel) -> ParsedLabel {
    match parse_segments(label.as_str()) {
        Ok((_, (crop, disease))) => ParsedLabel {
            crop: display_text(crop),
            disease: display_text(disease),
        },
        Err(_) => {
            tracing::debug!(label = label.as_str(), "label has no crop separator");
            ParsedLabel {
                crop: UNKNOWN_CROP.to_owned(),
                disease: display_text(label.as_str()),
            }
        }
    }
}

pub fn class_info(label: &ClassLabel) -> ClassInfo {
    let ParsedLabel { crop, disease } = parse(label);
    ClassInfo {
        class: label.clone(),
        crop,
        disease,
    }
}

fn parse_segments(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_until(SEPARATOR),
        tag(SEPARATOR),
        // anything after a second separator is dropped
        alt((take_until(SEPARATOR), rest)),
    )(input)
}

fn display_text(segment: &str) -> String {
    segment.replace('_', " ").trim().to_owned()
}
