mod cleanup;
mod emergency;
mod hooks;
mod identity;
mod install;
mod lint;
mod setup;
mod step;

pub use cleanup::{run_cleanup, run_cleanup_with_fallback};
pub use emergency::run_emergency_cleanup;
pub use hooks::{
    hook_scripts, is_disabled, marked_scripts, restore_hooks_dir, HooksPathRedirect,
    HooksRestore, ScriptNeutralizer, DISABLED_MARKER, HOOKS_PATH_SENTINEL, NOOP_HOOK_BODY,
};
pub use identity::{with_access_token, IdentityStep};
pub use install::{detect_install_command, InstallDependencies};
pub use lint::{
    disable_lint_tools, enable_lint_tools, LintToolsDisable, DISABLED_FILE_SUFFIX,
    DISABLED_PACKAGE_KEY_PREFIX,
};
pub use setup::{capture_paths, default_steps, SetupPipeline};
pub use step::{ReversibleStep, StepContext, Workspace};
