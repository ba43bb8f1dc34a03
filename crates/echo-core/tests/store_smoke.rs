use echo_core::errors::EchoError;
use echo_core::model::{
    AgentConfig, AgentKind, ConditionKind, Dataset, Experiment, ExperimentStatus, TargetAgent,
    TestCase, TestCondition, TestStep,
};
use echo_core::storage::Store;

fn dataset(id: &str) -> Dataset {
    Dataset {
        id: id.into(),
        name: "Billing".into(),
        description: "billing flows".into(),
        target_agent_id: "bot".into(),
        user_agent_id: None,
        created_at: chrono::Utc::now(),
        test_cases: vec![TestCase::new(
            "",
            vec![TestStep::speak("I need a refund")],
            vec![TestCondition::new(ConditionKind::ResponseContains, "refund")],
        )],
    }
}

#[test]
fn test_store_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("echo.db");

    let stored = {
        let store = Store::open(&path)?;
        store.init_schema()?;
        store.put_agent(&TargetAgent {
            id: "bot".into(),
            name: "Support bot".into(),
            kind: AgentKind::Http,
            config: AgentConfig {
                url: Some("http://localhost:9/chat".into()),
                ..Default::default()
            },
        })?;
        let ds = store.add_dataset(dataset("billing"))?;
        assert!(!ds.test_cases[0].id.is_empty(), "case ids are assigned");

        let mut exp = Experiment::start(&ds);
        exp.finish(ExperimentStatus::Completed);
        store.append_history(&exp)?;
        ds
    };

    let store = Store::open(&path)?;
    store.init_schema()?;
    assert_eq!(store.get_dataset("billing")?, Some(stored));
    assert_eq!(store.list_agents()?.len(), 1);

    let stats = store.stats()?;
    assert_eq!(stats.datasets, 1);
    assert_eq!(stats.experiments, 1);
    assert!(stats.last_experiment_at.is_some());
    Ok(())
}

#[test]
fn test_case_crud_is_last_write_wins() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    store.add_dataset(dataset("billing"))?;

    let added = store.add_case(
        "billing",
        TestCase::new("", vec![TestStep::speak("cancel my plan")], vec![]),
    )?;
    let mut edited = added.clone();
    edited.name = "cancellation".into();
    store.update_case("billing", &edited)?;

    let ds = store.get_dataset("billing")?.unwrap();
    assert_eq!(ds.test_cases.len(), 2);
    assert_eq!(ds.case(&added.id).unwrap().name, "cancellation");

    assert!(store.delete_case("billing", &added.id)?);
    assert!(!store.delete_case("billing", &added.id)?);

    // whole-document replace drops what the writer did not include
    let mut stale = store.get_dataset("billing")?.unwrap();
    stale.test_cases.clear();
    store.update_dataset(&stale)?;
    assert!(store.get_dataset("billing")?.unwrap().test_cases.is_empty());
    Ok(())
}

#[test]
fn test_missing_dataset_errors() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    let err = store.update_dataset(&dataset("ghost")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EchoError>(),
        Some(EchoError::DatasetNotFound(id)) if id == "ghost"
    ));
    assert!(store.add_case("ghost", TestCase::new("c", vec![], vec![])).is_err());
    assert!(!store.delete_dataset("ghost")?);

    store.add_dataset(dataset("billing"))?;
    assert!(store.add_dataset(dataset("billing")).is_err());
    Ok(())
}

#[test]
fn test_history_is_most_recent_first() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let ds = store.add_dataset(dataset("billing"))?;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut exp = Experiment::start(&ds);
        exp.finish(ExperimentStatus::Completed);
        store.append_history(&exp)?;
        ids.push(exp.id);
    }

    let hist = store.history(2)?;
    assert_eq!(hist.len(), 2);
    assert_eq!(hist[0].id, ids[2]);
    assert_eq!(hist[1].id, ids[1]);
    assert!(store.get_experiment(&ids[0])?.is_some());
    Ok(())
}
