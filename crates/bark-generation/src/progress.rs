//! Terminal progress reporting for the decode loops.

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar for one stage; hidden when `silent`.
pub(crate) fn stage_bar(stage: &'static str, total: u64, silent: bool) -> ProgressBar {
    if silent {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>8} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(stage);
    pb
}
