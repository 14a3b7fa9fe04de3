//! Boundary checks for task records and job parameters.

use crate::error::ValidationError;
use crate::task::{Task, TaskKind, TaskStatus};

/// Check a task record on arrival at a worker.
///
/// `FINISH` carries no payload and bypasses the id, status and input checks.
/// Everything else must arrive freshly leased: non-negative id, status
/// `InProgress` (an `Idle` or `Completed` record means the lease bookkeeping
/// was bypassed), and at least one input file.
pub fn validate_task(task: &Task) -> Result<(), ValidationError> {
    if task.kind == TaskKind::Finish {
        return Ok(());
    }

    let mut errors = Vec::new();

    if task.id < 0 {
        errors.push(format!("task id cannot be negative: {}", task.id));
    }

    let status = task.status();
    if status != TaskStatus::InProgress {
        errors.push(format!(
            "task {} arrived with status {:?}, expected InProgress",
            task.id, status
        ));
    }

    if task.inputs.is_empty() {
        errors.push(format!(
            "task {} of kind {:?} has no input files",
            task.id, task.kind
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(errors))
    }
}

/// Check job construction parameters: at least one input file, each
/// non-empty, and a positive reducer fan-out.
pub fn validate_job(inputs: &[String], n_reduce: usize) -> Result<(), ValidationError> {
    let mut errors = Vec::new();

    if inputs.is_empty() {
        errors.push("input files cannot be empty".to_string());
    }
    if inputs.iter().any(String::is_empty) {
        errors.push("input file names cannot be blank".to_string());
    }
    if n_reduce == 0 {
        errors.push("reduce task count must be greater than 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_bypasses_all_checks() {
        let task = Task::finish(3);
        assert!(validate_task(&task).is_ok());
    }

    #[test]
    fn freshly_leased_task_passes() {
        let task = Task::map(0, "file1.txt".into(), 3);
        task.set_status(TaskStatus::InProgress);
        assert!(validate_task(&task).is_ok());
    }

    #[test]
    fn idle_task_is_rejected() {
        let task = Task::map(0, "file1.txt".into(), 3);
        assert!(validate_task(&task).is_err());
    }

    #[test]
    fn completed_task_is_rejected() {
        let task = Task::map(0, "file1.txt".into(), 3);
        task.set_status(TaskStatus::Completed);
        assert!(validate_task(&task).is_err());
    }

    #[test]
    fn reduce_task_without_inputs_is_rejected() {
        let task = Task::reduce(1, vec![], 3);
        task.set_status(TaskStatus::InProgress);
        let err = validate_task(&task).unwrap_err();
        assert_eq!(err.errors().len(), 1);
    }

    #[test]
    fn job_parameters_are_checked() {
        assert!(validate_job(&["a.txt".into()], 1).is_ok());
        assert!(validate_job(&[], 1).is_err());
        assert!(validate_job(&["a.txt".into()], 0).is_err());
        assert!(validate_job(&[String::new()], 1).is_err());
    }
}
