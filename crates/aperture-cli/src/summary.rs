use std::path::Path;

use aperture_core::blind::BlindOutcome;
use aperture_core::config::BlindConfig;
use aperture_core::estimator::{FitSummary, StopReason};
use aperture_core::psf::{ModelKind, OpticsConfig, ParameterGroup, PsfModel, PsfOps};
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
    warning: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            warning: Style::new().yellow(),
        }
    }
}

fn print_title(s: &Styles, title: &str) {
    println!();
    println!("  {}", s.title.apply_to(title));
    println!(
        "  {}",
        s.title.apply_to("\u{2550}".repeat(title.chars().count()))
    );
    println!();
}

pub fn print_optics_summary(optics: &OpticsConfig, model: &ModelKind) {
    let s = Styles::new();
    print_title(&s, "Aperture PSF");
    print_optics_section(&s, optics, model);
}

fn print_optics_section(s: &Styles, optics: &OpticsConfig, model: &ModelKind) {
    println!("  {}", s.header.apply_to("Optics"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Model"),
        s.method.apply_to(model)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Shape"),
        s.value.apply_to(optics.shape)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("NA"),
        s.value.apply_to(optics.numerical_aperture)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Wavelength"),
        s.value.apply_to(optics.wavelength)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Index"),
        s.value.apply_to(optics.immersion_index)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Pixel"),
        s.value
            .apply_to(format!("{} x {}", optics.lateral_pixel, optics.axial_pixel))
    );
    if let ModelKind::PupilFunction = model {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Modes"),
            s.value.apply_to(format!(
                "{} phase, {} modulus{}",
                optics.phase_modes,
                optics.modulus_modes,
                if optics.radial { " (radial)" } else { "" }
            ))
        );
    }
    println!();
}

pub fn print_run_summary(config: &BlindConfig, data: &Path) {
    let s = Styles::new();
    print_title(&s, "Aperture Blind Deconvolution");

    println!(
        "  {:<14}{}",
        s.label.apply_to("Input"),
        s.path.apply_to(data.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Precision"),
        s.value.apply_to(config.optics.precision)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Weights"),
        s.value.apply_to(config.weights)
    );
    println!();

    print_optics_section(&s, &config.optics, &config.model);

    println!("  {}", s.header.apply_to("Deconvolution"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Passes"),
        s.value.apply_to(config.passes)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Mu"),
        s.value.apply_to(config.deconvolution.regularization)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Epsilon"),
        s.value.apply_to(config.deconvolution.edge_threshold)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Iterations"),
        s.value.apply_to(config.deconvolution.max_iterations)
    );
    println!();

    println!("  {}", s.header.apply_to("Estimation"));
    for group in ParameterGroup::ALL {
        let budget = config.budgets.get(group);
        let label = s.label.apply_to(format!("{group}"));
        if budget == 0 {
            println!("    {:<14}{}", label, s.disabled.apply_to("disabled"));
        } else {
            println!(
                "    {:<14}{}",
                label,
                s.value.apply_to(format!("{budget} iterations"))
            );
        }
    }
    println!();
}

pub fn print_outcome(outcome: &BlindOutcome, model: &PsfModel) {
    let s = Styles::new();
    print_title(&s, "Result");

    if outcome.aborted {
        println!(
            "  {}",
            s.warning.apply_to(format!(
                "Aborted after {} pass(es)",
                outcome.passes_completed
            ))
        );
        println!();
    }

    if !outcome.fits.is_empty() {
        println!("  {}", s.header.apply_to("Fits"));
        for (pass, fit) in &outcome.fits {
            print_fit(&s, *pass, fit);
        }
        println!();
    }

    println!("  {}", s.header.apply_to("Coefficients"));
    let flags = model.parameter_flags();
    for group in ParameterGroup::ALL.into_iter().filter(|g| flags.contains(*g)) {
        if let Ok(params) = model.param(group) {
            println!(
                "    {:<14}{}",
                s.label.apply_to(format!("{group}")),
                s.value.apply_to(format_coefficients(params.values()))
            );
        }
    }
}

fn print_fit(s: &Styles, pass: usize, fit: &FitSummary) {
    let cost = match (fit.initial_cost, fit.best_cost) {
        (Some(start), Some(best)) => format!("{start:.4e} -> {best:.4e}"),
        _ => "-".to_string(),
    };
    let stop = match fit.stop {
        StopReason::Optimizer(_) | StopReason::Aborted => s.warning.apply_to(fit.stop),
        _ => s.method.apply_to(fit.stop),
    };
    println!(
        "    {} {:<10}{:<28}{:>4} it {:>4} ev  {}",
        s.label.apply_to(format!("#{}", pass + 1)),
        s.value.apply_to(format!("{}", fit.group)),
        cost,
        fit.iterations,
        fit.evaluations,
        stop
    );
}

fn format_coefficients(values: &[f64]) -> String {
    let shown: Vec<String> = values.iter().map(|v| format!("{v:.5}")).collect();
    format!("[{}]", shown.join(", "))
}
