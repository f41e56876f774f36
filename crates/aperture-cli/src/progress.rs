use aperture_core::blind::{BlindProgress, Budgets};
use aperture_core::estimator::FitSummary;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over the steps of a blind run: one deconvolution per pass
/// plus one fit per enabled group on every pass but the last.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(passes: usize, budgets: &Budgets) -> anyhow::Result<Self> {
        let groups = budgets.enabled().count();
        let steps = passes + passes.saturating_sub(1) * groups;
        let bar = ProgressBar::new(steps as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:24} [{bar:40}] {pos}/{len}")?
                .progress_chars("=> "),
        );
        Ok(Self { bar })
    }
}

impl BlindProgress for BarProgress {
    fn begin_pass(&self, pass: usize, total: usize) {
        self.bar
            .set_message(format!("Pass {}/{}: deconvolving", pass + 1, total));
    }

    fn deconvolved(&self, _pass: usize) {
        self.bar.inc(1);
    }

    fn group_fitted(&self, pass: usize, summary: &FitSummary) {
        self.bar
            .set_message(format!("Pass {}: {} fitted", pass + 1, summary.group));
        self.bar.inc(1);
    }

    fn finished(&self, aborted: bool) {
        if aborted {
            self.bar.abandon_with_message("Aborted");
        } else {
            self.bar.finish_with_message("Done");
        }
    }
}
