use super::exit_codes;
use crate::cli::args::ValidateArgs;
use echo_core::config::load_config;

pub fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let policy = cfg.settings.empty_conditions.unwrap_or_default();
    let mut errors = 0;
    let mut cases = 0;
    for ds in &cfg.datasets {
        for case in &ds.test_cases {
            cases += 1;
            if let Err(e) = case.validate(policy) {
                errors += 1;
                eprintln!("❌ {}/{}: {}", ds.id, case.id, e);
            }
        }
    }

    if errors > 0 {
        eprintln!("{} of {} test cases are invalid", errors, cases);
        return Ok(exit_codes::CONFIG_ERROR);
    }
    eprintln!(
        "✅ {} valid ({} agents, {} datasets, {} test cases)",
        args.config.display(),
        cfg.agents.len(),
        cfg.datasets.len(),
        cases
    );
    Ok(exit_codes::OK)
}
