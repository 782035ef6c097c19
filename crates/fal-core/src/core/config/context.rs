use crate::config::{Config, GlobalOptions};
use crate::effects::{Effects, EnvironmentProvisioner, PythonRuntime, SharedEffects};

pub struct CommandContext<'a> {
    pub global: &'a GlobalOptions,
    config: Config,
    effects: SharedEffects,
}

impl<'a> CommandContext<'a> {
    #[must_use]
    pub fn new(global: &'a GlobalOptions, config: Config, effects: SharedEffects) -> Self {
        Self {
            global,
            config,
            effects,
        }
    }

    pub fn effects(&self) -> &dyn Effects {
        self.effects.as_ref()
    }

    pub fn python_runtime(&self) -> &dyn PythonRuntime {
        self.effects.python()
    }

    pub fn provisioner(&self) -> &dyn EnvironmentProvisioner {
        self.effects.provisioner()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
