pub mod command;
pub mod divergence;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod ops;
pub mod process;
pub mod refs;
pub mod repo;
pub mod worktree;

pub use command::*;
pub use divergence::*;
pub use error::*;
#[cfg(any(test, feature = "testing"))]
pub use fake::*;
pub use ops::*;
pub use process::*;
pub use refs::*;
pub use repo::*;
pub use worktree::*;

#[cfg(test)]
pub(crate) mod testutil {
    use std::fs;
    use std::path::Path;
    use std::process::Command;

    use tempfile::TempDir;

    pub fn run_git(cwd: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=Test User",
                "-c",
                "user.email=test@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Repository with one commit on `main`.
    pub fn init_repo() -> TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        run_git(dir.path(), &["init", "--quiet"]);
        run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
        commit_file(dir.path(), "README.md", "init\n", "init");
        dir
    }

    pub fn commit_file(root: &Path, file: &str, contents: &str, message: &str) {
        fs::write(root.join(file), contents).expect("write file");
        run_git(root, &["add", file]);
        run_git(root, &["commit", "--quiet", "-m", message]);
    }
}
