/*!
 * Batch translation of book units.
 *
 * - `batch`: shared cursor, counters, live-worker set and stop flag of a run
 * - `worker`: one sequential stream of unit translations on a channel
 * - `scheduler`: sizing, staggered start-up and hot-add of workers
 * - `dispatch`: one backend call with correlation, retry and marker checks
 * - `retry`: bounded linear-backoff retry policy
 * - `prompts`: prompt preparation seam and template implementation
 * - `results`: result maps keyed by unit id
 * - `core`: single-unit translate and summarise operations
 * - `export`: writing stored texts as a book
 */

pub use self::batch::{BatchProgress, BatchState, ProcessingEntry, RunStatus, UnitOutcome};
pub use self::core::TranslationService;
pub use self::export::{BookExporter, ExportMode, PlainTextExporter, export_book};
pub use self::prompts::{PromptPreparer, TemplatePromptPreparer};
pub use self::results::{TranslationResult, TranslationResults};
pub use self::retry::{RetryError, RetryPolicy};
pub use self::scheduler::{RunHandle, RunReport, SchedulerConfig, WorkerPoolScheduler};
pub use self::worker::{Worker, WorkerSummary};

pub mod batch;
pub mod core;
pub mod dispatch;
pub mod export;
pub mod prompts;
pub mod results;
pub mod retry;
pub mod scheduler;
pub mod worker;
