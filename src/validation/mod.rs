/*!
 * Validation of backend output.
 *
 * - `markers`: completion marker checks used to detect truncated responses
 */

pub mod markers;

pub use markers::CompletionMarker;
