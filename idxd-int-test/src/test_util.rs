use idxd::errors::IdxdResult;
use idxd::migration::{IndexSpec, SchemaSnapshot, StoreSpec};
use idxd::store::memory::MemoryEngine;
use idxd::{Idxd, IdxdBuilder};
use std::backtrace::Backtrace;
use std::thread;
use std::time::{Duration, Instant};

/// Runs a test with retry logic and error handling.
/// Tests run on the current thread; the in-memory engine is driven by `Pending::wait`.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> IdxdResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> IdxdResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> IdxdResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => match after(ctx) {
                        Ok(_) => Ok(()),
                        Err(e) => Err((format!("After run failed: {:?}", e), backtrace.to_string())),
                    },
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();

        match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                last_error = Some(e.clone());
                last_backtrace = Some(bt);
                if attempt < MAX_RETRIES {
                    eprintln!(
                        "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                        attempt, MAX_RETRIES, elapsed
                    );
                    eprintln!("Error: {}", e);
                    thread::sleep(Duration::from_millis(50 * attempt as u64));
                }
            }
            Err(panic_err) => {
                let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                last_error = Some(format!("Panic: {}", err_msg));
                last_backtrace = Some(Backtrace::capture().to_string());

                if attempt < MAX_RETRIES {
                    eprintln!(
                        "\n========== Test Attempt {}/{} Panicked (took {:?}) ==========",
                        attempt, MAX_RETRIES, elapsed
                    );
                    eprintln!("{}", err_msg);
                    thread::sleep(Duration::from_millis(50 * attempt as u64));
                }
            }
        }
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {} attempts", MAX_RETRIES);
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    eprintln!("=====================================================\n");

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// An open database on its own in-memory engine.
#[derive(Clone)]
pub struct TestContext {
    name: String,
    engine: MemoryEngine,
    db: Idxd,
}

impl TestContext {
    pub fn new(name: String, engine: MemoryEngine, db: Idxd) -> Self {
        Self { name, engine, db }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> MemoryEngine {
        self.engine.clone()
    }

    pub fn db(&self) -> Idxd {
        self.db.clone()
    }

    /// A second, unopened instance of the same database on the same engine.
    pub fn sibling(&self) -> IdxdResult<Idxd> {
        Idxd::with_engine(&self.name, self.engine.clone())
    }
}

pub fn random_name() -> String {
    format!("idxd-{}", uuid::Uuid::new_v4())
}

/// Schema used by most tests: `books` keyed by an auto-incremented `id`
/// with an `author` index, and `authors` keyed by `name`.
pub fn library_schema() -> SchemaSnapshot {
    SchemaSnapshot::new()
        .store(
            StoreSpec::new("books")
                .key_path("id")
                .auto_increment(true)
                .index(IndexSpec::new("author")),
        )
        .store(StoreSpec::new("authors").key_path("name"))
}

/// Opens a fresh database at version 1 of [library_schema].
pub fn create_test_context() -> IdxdResult<TestContext> {
    create_test_context_with(|builder| builder.version(1, library_schema()))
}

/// Opens a fresh database whose versions are declared by `declare`.
pub fn create_test_context_with(declare: impl FnOnce(IdxdBuilder) -> IdxdBuilder) -> IdxdResult<TestContext> {
    let name = random_name();
    let engine = MemoryEngine::new();
    let builder = Idxd::builder().name(&name).engine(engine.clone());
    let db = declare(builder).open()?.wait()?;
    Ok(TestContext::new(name, engine, db))
}

pub fn cleanup(ctx: TestContext) -> IdxdResult<()> {
    ctx.db().delete_database().wait()
}
