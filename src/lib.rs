use indicatif::ProgressStyle;

pub mod batch;

pub fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{elapsed_precise} {span_name} {span_fields} {bar:40.green/yellow} {pos:>7}/{len:7} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
