use std::path::Path;

use crate::job::Device;
use super::EngineInvocation;

const TOKEN_FLAG: &str = "--hugging_face_token";
const REDACTED: &str = "<redacted>";

/// Abstract dubbing engine command representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
    pub description: String,
}

impl EngineCommand {
    /// Create a new engine command
    pub fn new<S1: Into<String>, S2: Into<String>>(program: S1, description: S2) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add a `--flag value` pair
    pub fn flag<S: Into<String>>(self, flag: &str, value: S) -> Self {
        self.arg(flag).arg(value)
    }

    fn path_flag<P: AsRef<Path>>(self, flag: &str, path: P) -> Self {
        self.flag(flag, path.as_ref().to_string_lossy().to_string())
    }

    /// Set the input video
    pub fn input_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.path_flag("--input_file", path)
    }

    /// Set the language to dub into
    pub fn target_language<S: Into<String>>(self, language: S) -> Self {
        self.flag("--target_language", language)
    }

    /// Set the spoken language of the input
    pub fn source_language<S: Into<String>>(self, language: S) -> Self {
        self.flag("--source_language", language)
    }

    /// Set the Hugging Face token
    pub fn token<S: Into<String>>(self, token: S) -> Self {
        self.flag(TOKEN_FLAG, token)
    }

    /// Set the directory the result is written into
    pub fn output_directory<P: AsRef<Path>>(self, path: P) -> Self {
        self.path_flag("--output_directory", path)
    }

    /// Set the result file name
    pub fn output_name<S: Into<String>>(self, name: S) -> Self {
        self.flag("--output_name", name)
    }

    /// Set the text-to-speech backend
    pub fn tts_engine<S: Into<String>>(self, engine: S) -> Self {
        self.flag("--tts_engine", engine)
    }

    /// Set the compute device
    pub fn device(self, device: Device) -> Self {
        self.flag("--device", device.as_str())
    }

    /// Arguments with the token value masked, safe to log
    pub fn redacted_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        for i in 0..args.len() {
            if args[i] == TOKEN_FLAG {
                if let Some(value) = args.get_mut(i + 1) {
                    *value = REDACTED.to_string();
                }
            }
        }
        args
    }

    /// Full command line with the token value masked
    pub fn redacted(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.redacted_args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Builder for engine commands
#[derive(Debug, Clone)]
pub struct EngineCommandBuilder {
    program: String,
    base_args: Vec<String>,
}

impl EngineCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(program: S, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    fn base<S: Into<String>>(&self, description: S) -> EngineCommand {
        EngineCommand::new(&self.program, description).args(self.base_args.iter().cloned())
    }

    /// Build the dubbing command for one job
    pub fn dub(&self, invocation: &EngineInvocation) -> EngineCommand {
        let mut cmd = self
            .base("Dubbing")
            .input_file(&invocation.input_file)
            .target_language(&invocation.target_language)
            .token(&invocation.token)
            .output_directory(&invocation.output_dir)
            .tts_engine(invocation.tts_engine.as_str())
            .output_name(&invocation.output_name);

        if let Some(source) = &invocation.source_language {
            cmd = cmd.source_language(source);
        }

        cmd.device(invocation.device)
    }

    /// Build the command used to check that the engine starts
    pub fn help(&self) -> EngineCommand {
        self.base("Engine availability check").arg("--help")
    }
}
