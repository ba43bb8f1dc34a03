use super::{exit_codes, open_store};
use crate::cli::args::{DatasetsArgs, DatasetsSub, HistoryArgs};
use echo_core::report::console;

pub fn run(args: DatasetsArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    match args.cmd {
        DatasetsSub::List => {
            let all = store.list_datasets()?;
            if all.is_empty() {
                eprintln!("No datasets. Import some with `olympus-echo run --config <file>`.");
            }
            for ds in all {
                println!(
                    "{:<20} {:<24} agent={:<16} cases={}",
                    ds.id,
                    ds.name,
                    ds.target_agent_id,
                    ds.test_cases.len()
                );
            }
            Ok(exit_codes::OK)
        }
        DatasetsSub::Show { id } => match store.get_dataset(&id)? {
            Some(ds) => {
                println!("{}", serde_json::to_string_pretty(&ds)?);
                Ok(exit_codes::OK)
            }
            None => {
                eprintln!("error: dataset not found: {}", id);
                Ok(exit_codes::CONFIG_ERROR)
            }
        },
        DatasetsSub::Delete { id } => {
            if store.delete_dataset(&id)? {
                eprintln!("deleted {}", id);
                Ok(exit_codes::OK)
            } else {
                eprintln!("error: dataset not found: {}", id);
                Ok(exit_codes::CONFIG_ERROR)
            }
        }
    }
}

pub fn history(args: HistoryArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    console::print_history(&store.history(args.last)?);
    Ok(exit_codes::OK)
}
