use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use initializer::{
    Completion, Context, FailureKind, InitError, Initialize, Initializer, UnitResult,
};

const STARTUP: &str = "startup";

fn noop(_: &mut Context) -> Completion<'_> {
    Completion::done()
}

fn none() -> Vec<String> {
    Vec::new()
}

/// Shared log of which units ran, in order.
#[derive(Clone, Default)]
struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    fn record(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn traced(
    init: &mut Initializer,
    trace: &Trace,
    name: &'static str,
    deps: &[&str],
) {
    let trace = trace.clone();
    init.add(STARTUP, name, deps.iter().copied(), move |_| {
        trace.record(name);
        Completion::done()
    })
    .unwrap();
}

mod resolution {
    use super::*;

    #[test]
    fn test_dependency_runs_first_and_ties_keep_registration_order() {
        let mut init = Initializer::new();
        init.add(STARTUP, "B", ["A"], noop).unwrap();
        init.add(STARTUP, "C", ["A"], noop).unwrap();
        init.add(STARTUP, "A", none(), noop).unwrap();

        assert_eq!(init.resolve(STARTUP).unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_two_unit_cycle_reports_path() {
        let mut init = Initializer::new();
        init.add(STARTUP, "X", ["Y"], noop).unwrap();
        init.add(STARTUP, "Y", ["X"], noop).unwrap();

        match init.resolve(STARTUP).unwrap_err() {
            InitError::CycleDetected { cycle, .. } => assert_eq!(cycle, vec!["X", "Y", "X"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency_names_unit_and_target() {
        let mut init = Initializer::new();
        init.add(STARTUP, "Z", ["Missing"], noop).unwrap();

        let err = init.resolve(STARTUP).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Initializer startup/Z depends on unknown initializer Missing"
        );
    }

    #[test]
    fn test_resolve_twice_is_identical() {
        let mut init = Initializer::new();
        init.add(STARTUP, "http", ["config"], noop).unwrap();
        init.add(STARTUP, "db", ["config", "logging"], noop).unwrap();
        init.add(STARTUP, "logging", ["config"], noop).unwrap();
        init.add(STARTUP, "config", none(), noop).unwrap();

        let first = init.resolve(STARTUP).unwrap();
        let second = init.resolve(STARTUP).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["config", "http", "logging", "db"]);
    }

    #[test]
    fn test_every_dependency_precedes_its_dependent() {
        let mut init = Initializer::new();
        // (name, space separated dependencies)
        let units = [
            ("routes", "http db"),
            ("db", "config logging"),
            ("http", "config"),
            ("metrics", ""),
            ("logging", "config"),
            ("config", ""),
            ("migrate", "db logging"),
        ];
        for (name, deps) in units {
            init.add(STARTUP, name, deps.split_whitespace(), noop).unwrap();
        }

        let order = init.resolve(STARTUP).unwrap();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        for (name, deps) in units {
            for dep in deps.split_whitespace() {
                assert!(position(dep) < position(name), "{dep} must precede {name}");
            }
        }
    }

    #[test]
    fn test_cross_phase_dependency_is_unknown() {
        let mut init = Initializer::new();
        init.add(STARTUP, "config", none(), noop).unwrap();
        init.add("activate", "server", ["config"], noop).unwrap();

        let err = init.resolve("activate").unwrap_err();
        assert!(matches!(err, InitError::UnknownDependency { ref missing, .. } if missing == "config"));
    }

    #[test]
    fn test_duplicate_rejected_regardless_of_order() {
        let mut init = Initializer::new();
        init.add(STARTUP, "db", ["config"], noop).unwrap();
        init.add(STARTUP, "config", none(), noop).unwrap();

        let err = init.add(STARTUP, "db", none(), noop).unwrap_err();
        assert!(matches!(err, InitError::DuplicateUnit { .. }));
    }
}

mod execution {
    use super::*;

    fn install_conf(ctx: &mut Context) -> Completion<'_> {
        Completion::ready(ctx.insert("conf", "production".to_string()).map_err(Into::into))
    }

    fn install_log(ctx: &mut Context) -> Completion<'_> {
        Completion::pending(async move {
            let conf = ctx.get::<String>("conf")?.clone();
            ctx.insert("log", format!("logger for {conf}"))?;
            Ok(())
        })
    }

    fn fail(_: &mut Context) -> Completion<'_> {
        Completion::ready(Err(anyhow!("database unreachable")))
    }

    #[tokio::test]
    async fn test_failure_after_sibling_keeps_its_capability() {
        let mut init = Initializer::new();
        init.add(STARTUP, "A", none(), install_conf).unwrap();
        init.add(STARTUP, "B", ["A"], install_log).unwrap();
        init.add(STARTUP, "C", ["A"], fail).unwrap();

        let mut ctx = Context::new();
        let err = init.run(STARTUP, &mut ctx).await.unwrap_err();

        let failure = err.failure().unwrap();
        assert_eq!(failure.name, "C");
        assert!(ctx.contains("conf"));
        assert_eq!(ctx.get::<String>("log").unwrap(), "logger for production");
    }

    #[tokio::test]
    async fn test_failure_before_sibling_skips_it() {
        let mut init = Initializer::new();
        init.add(STARTUP, "A", none(), install_conf).unwrap();
        init.add(STARTUP, "C", ["A"], fail).unwrap();
        init.add(STARTUP, "B", ["A"], install_log).unwrap();

        let mut ctx = Context::new();
        let err = init.run(STARTUP, &mut ctx).await.unwrap_err();

        assert_eq!(err.failure().unwrap().name, "C");
        assert!(ctx.contains("conf"));
        assert!(!ctx.contains("log"));
    }

    #[tokio::test]
    async fn test_units_after_failure_never_run() {
        let trace = Trace::default();
        let mut init = Initializer::new();
        traced(&mut init, &trace, "first", &[]);
        traced(&mut init, &trace, "unrelated", &[]);
        init.add(STARTUP, "boom", ["first"], fail).unwrap();
        traced(&mut init, &trace, "after", &["boom"]);
        traced(&mut init, &trace, "last", &[]);

        let mut ctx = Context::new();
        init.run(STARTUP, &mut ctx).await.unwrap_err();

        // resolved order: first, unrelated, boom, after, last
        assert_eq!(trace.entries(), vec!["first", "unrelated"]);
    }

    #[tokio::test]
    async fn test_structural_error_runs_nothing() {
        let trace = Trace::default();
        let mut init = Initializer::new();
        traced(&mut init, &trace, "config", &[]);
        traced(&mut init, &trace, "logging", &["config", "cls"]);

        let mut ctx = Context::new();
        let err = init.run(STARTUP, &mut ctx).await.unwrap_err();

        assert!(err.is_structural());
        assert!(trace.entries().is_empty());
    }

    #[tokio::test]
    async fn test_failure_chain_is_preserved() {
        let mut init = Initializer::new();
        init.add(STARTUP, "db", none(), |_| {
            Completion::pending(async {
                let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
                Err(anyhow::Error::new(io).context("opening pool"))
            })
        })
        .unwrap();

        let mut ctx = Context::new();
        let err = init.run(STARTUP, &mut ctx).await.unwrap_err();
        match &err.failure().unwrap().kind {
            FailureKind::Error(cause) => {
                assert!(cause.downcast_ref::<std::io::Error>().is_some());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(
            format!("{:#}", anyhow::Error::new(err).context("bootstrap failed")),
            "bootstrap failed: Initializer startup/db failed: opening pool: refused"
        );
    }

    #[tokio::test]
    async fn test_phases_share_context() {
        let mut init = Initializer::new();
        init.add(STARTUP, "A", none(), install_conf).unwrap();
        init.add("activate", "B", none(), install_log).unwrap();

        let mut ctx = Context::new();
        let reports = init
            .run_phases([STARTUP, "activate"], &mut ctx)
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(ctx.names().collect::<Vec<_>>(), vec!["conf", "log"]);
        assert_eq!(ctx.owner("log"), Some("B"));
    }

    #[tokio::test]
    async fn test_reading_undeclared_capability_fails_clearly() {
        let mut init = Initializer::new();
        init.add(STARTUP, "eager", none(), install_log).unwrap();
        init.add(STARTUP, "A", none(), install_conf).unwrap();

        let mut ctx = Context::new();
        let err = init.run(STARTUP, &mut ctx).await.unwrap_err();
        assert_eq!(
            err.failure().unwrap().report(),
            "Initializer startup/eager failed: Capability not found: conf"
        );
    }
}

mod struct_initializers {
    use super::*;

    struct Config {
        level: &'static str,
    }

    #[async_trait]
    impl Initialize for Config {
        fn phase(&self) -> &str {
            STARTUP
        }

        fn name(&self) -> &str {
            "config"
        }

        async fn run(&self, ctx: &mut Context) -> UnitResult {
            tokio::task::yield_now().await;
            ctx.insert("config", self.level.to_string())?;
            Ok(())
        }
    }

    struct Logging;

    #[async_trait]
    impl Initialize for Logging {
        fn phase(&self) -> &str {
            STARTUP
        }

        fn name(&self) -> &str {
            "logging"
        }

        fn dependencies(&self) -> Vec<String> {
            vec!["config".to_string()]
        }

        async fn run(&self, ctx: &mut Context) -> UnitResult {
            let level = ctx.get::<String>("config")?.clone();
            ctx.insert("log", level)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_installed_initializers_run_in_dependency_order() {
        let mut init = Initializer::new();
        init.install(Logging).unwrap();
        init.install(Config { level: "debug" }).unwrap();

        let mut ctx = Context::new();
        let report = init.run(STARTUP, &mut ctx).await.unwrap();

        assert_eq!(report.completed, vec!["config", "logging"]);
        assert_eq!(ctx.get::<String>("log").unwrap(), "debug");
    }

    #[tokio::test]
    async fn test_mixed_registration_styles_share_names() {
        let mut init = Initializer::new();
        init.install(Config { level: "info" }).unwrap();

        let err = init.add(STARTUP, "config", none(), noop).unwrap_err();
        assert!(matches!(err, InitError::DuplicateUnit { .. }));
    }
}
