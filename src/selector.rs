use crate::{error::PipelineError, media_api::AudioVariant};

const MP4_AUDIO_MIME: &str = "audio/mp4";
const M4A_EXTENSION: &str = "m4a";

fn is_mp4_audio(variant: &AudioVariant) -> bool {
    variant.mime_type.to_ascii_lowercase().contains(MP4_AUDIO_MIME)
        || variant.extension.eq_ignore_ascii_case(M4A_EXTENSION)
}

/// First m4a stream in listed order, otherwise the largest. Variants without a URL never win.
pub fn select_variant(variants: &[AudioVariant]) -> Result<&AudioVariant, PipelineError> {
    if variants.is_empty() {
        return Err(PipelineError::NoUsableVariant(
            "no audio formats available".to_string(),
        ));
    }

    let candidates: Vec<&AudioVariant> = variants
        .iter()
        .filter(|variant| variant.has_fetch_url())
        .collect();

    if let Some(variant) = candidates.iter().copied().find(|variant| is_mp4_audio(variant)) {
        return Ok(variant);
    }

    let mut by_size = candidates;
    by_size.sort_by(|a, b| b.size.cmp(&a.size));
    by_size.first().copied().ok_or_else(|| {
        PipelineError::NoUsableVariant(format!(
            "none of the {} audio formats has a download URL",
            variants.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(extension: &str, size: u64) -> AudioVariant {
        AudioVariant {
            mime_type: format!("audio/{extension}"),
            extension: extension.to_string(),
            size,
            size_text: None,
            url: Some(format!("https://cdn.example/{extension}-{size}")),
        }
    }

    #[test]
    fn prefers_m4a_over_larger_streams() {
        let variants = [variant("webm", 500), variant("m4a", 300)];
        assert_eq!(select_variant(&variants).unwrap().extension, "m4a");

        let reversed = [variant("m4a", 300), variant("webm", 500)];
        assert_eq!(select_variant(&reversed).unwrap().extension, "m4a");
    }

    #[test]
    fn recognizes_mp4_audio_by_mime_type() {
        let mut mp4 = variant("mp4", 10);
        mp4.mime_type = "audio/MP4; codecs=\"mp4a.40.2\"".to_string();
        let variants = [variant("webm", 900), mp4];
        assert_eq!(select_variant(&variants).unwrap().extension, "mp4");
    }

    #[test]
    fn falls_back_to_largest_stream() {
        let variants = [variant("webm", 500), variant("webm", 900)];
        assert_eq!(select_variant(&variants).unwrap().size, 900);
    }

    #[test]
    fn equal_sizes_keep_listed_order() {
        let mut first = variant("webm", 700);
        first.url = Some("https://cdn.example/first".to_string());
        let variants = [first, variant("webm", 700)];
        assert_eq!(
            select_variant(&variants).unwrap().url.as_deref(),
            Some("https://cdn.example/first")
        );
    }

    #[test]
    fn empty_input_has_no_usable_variant() {
        let error = select_variant(&[]).unwrap_err();
        assert!(matches!(error, PipelineError::NoUsableVariant(_)));
    }

    #[test]
    fn variants_without_url_are_never_selected() {
        let mut m4a = variant("m4a", 300);
        m4a.url = None;
        let variants = [m4a.clone(), variant("webm", 100)];
        assert_eq!(select_variant(&variants).unwrap().extension, "webm");

        let error = select_variant(&[m4a]).unwrap_err();
        assert!(matches!(error, PipelineError::NoUsableVariant(_)));
    }
}
