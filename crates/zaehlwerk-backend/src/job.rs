// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job descriptor construction.
//
// The scheduler invokes this program the way it invokes any backend:
//
//   argv[1]  job ID
//   argv[2]  user printing the job
//   argv[3]  job name/title
//   argv[4]  number of copies
//   argv[5]  options provided at submission
//   argv[6]  file to print (optional; otherwise the payload arrives on stdin)
//
// Everything the pipeline needs from the invocation and the environment is
// captured here, once, into an immutable descriptor. No later stage reads
// argv or environment variables ambiently.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::debug;

use zaehlwerk_core::error::{Result, ZaehlwerkError};

/// URI scheme this gateway wraps around the real device URI.
pub const GATEWAY_SCHEME: &str = "zaehlwerk";

/// The one content type that can be accounted for.
pub const SUPPORTED_CONTENT_TYPE: &str = "application/pdf";

/// Filetype marker the scheduler sets for banner pages.
const JOB_SHEET_FILETYPE: &str = "job-sheet";

/// Informational variables captured verbatim but never interpreted.
const PASSTHROUGH_VARS: &[&str] = &[
    "APPLE_LANGUAGE",
    "CHARSET",
    "CLASS",
    "CUPS_CACHEDIR",
    "CUPS_DATADIR",
    "CUPS_SERVERROOT",
    "FINAL_CONTENT_TYPE",
    "LANG",
    "PPD",
    "RIP_CACHE",
    "TMPDIR",
];

/// Where the job payload comes from. An explicit file argument always wins
/// over standard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    File(PathBuf),
    Stdin,
}

/// Immutable snapshot of the scheduler-provided environment.
#[derive(Debug, Clone)]
pub struct JobEnv {
    pub content_type: Option<String>,
    pub device_uri: Option<String>,
    pub filetype: Option<String>,
    pub printer: Option<String>,
    /// Informational variables, captured but uninterpreted.
    pub passthrough: BTreeMap<String, String>,
    /// The complete raw environment, kept for the child exec.
    raw: Vec<(OsString, OsString)>,
}

impl JobEnv {
    /// Snapshot the given environment variables.
    pub fn capture(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let raw: Vec<(OsString, OsString)> = vars.into_iter().collect();

        let lookup = |name: &str| -> Option<String> {
            raw.iter()
                .find(|(k, _)| k.as_os_str() == OsStr::new(name))
                .and_then(|(_, v)| v.to_str().map(str::to_owned))
        };

        let passthrough = PASSTHROUGH_VARS
            .iter()
            .filter_map(|name| lookup(name).map(|v| (name.to_string(), v)))
            .collect();

        let content_type = lookup("CONTENT_TYPE");
        let device_uri = lookup("DEVICE_URI");
        let filetype = lookup("CUPS_FILETYPE");
        let printer = lookup("PRINTER");

        Self {
            content_type,
            device_uri,
            filetype,
            printer,
            passthrough,
            raw,
        }
    }

    /// Whether this job is a banner/job-sheet rather than a document.
    pub fn is_banner(&self) -> bool {
        self.filetype.as_deref() == Some(JOB_SHEET_FILETYPE)
    }

    /// The environment the real backend will be exec'd with: the captured
    /// snapshot, with DEVICE_URI rewritten to the unwrapped target URI.
    pub fn child_env(&self, device_uri: &str) -> Vec<(OsString, OsString)> {
        let mut vars: Vec<(OsString, OsString)> = self
            .raw
            .iter()
            .filter(|(k, _)| k.as_os_str() != OsStr::new("DEVICE_URI"))
            .cloned()
            .collect();
        vars.push((OsString::from("DEVICE_URI"), OsString::from(device_uri)));
        vars
    }
}

/// The structured, immutable representation of one print request.
///
/// Only `page_count` is attached later, once, after counting.
#[derive(Debug)]
pub struct JobDescriptor {
    /// argv[0]; locates sibling backends and names the usage text.
    pub program: String,
    pub job_id: String,
    pub user: String,
    pub title: String,
    pub copies: String,
    pub options: String,
    pub payload: PayloadSource,
    pub env: JobEnv,
    /// The original invocation, kept verbatim for argument reconstruction.
    raw_args: Vec<String>,
    page_count: Option<u32>,
}

impl JobDescriptor {
    /// Build a descriptor from the full argv (program name included) and an
    /// environment snapshot.
    ///
    /// Anything other than 5 or 6 positional values is a usage error; the
    /// caller exits 1 without further side effects.
    pub fn from_invocation(
        args: Vec<String>,
        vars: impl IntoIterator<Item = (OsString, OsString)>,
    ) -> Result<Self> {
        let program = args.first().cloned().unwrap_or_else(|| "zaehlwerk".into());

        if args.len() < 6 || args.len() > 7 {
            return Err(ZaehlwerkError::Usage(program));
        }

        let payload = match args.get(6) {
            Some(path) => PayloadSource::File(PathBuf::from(path)),
            None => PayloadSource::Stdin,
        };

        let env = JobEnv::capture(vars);
        debug!(job_id = %args[1], user = %args[2], "job descriptor built");

        Ok(Self {
            program,
            job_id: args[1].clone(),
            user: args[2].clone(),
            title: args[3].clone(),
            copies: args[4].clone(),
            options: args[5].clone(),
            payload,
            env,
            raw_args: args,
            page_count: None,
        })
    }

    /// The invocation as received, for argument reconstruction.
    pub fn raw_args(&self) -> &[String] {
        &self.raw_args
    }

    /// Attach the page count after counting. Set once.
    pub fn set_page_count(&mut self, pages: u32) {
        self.page_count = Some(pages);
    }

    pub fn page_count(&self) -> Option<u32> {
        self.page_count
    }

    /// Materialize the payload so it can be both counted and re-delivered.
    ///
    /// A file payload is read and reopened; a stdin payload is drained into
    /// an unnamed temp file so the child gets a rewindable descriptor.
    pub fn spool(&self) -> Result<SpooledPayload> {
        match &self.payload {
            PayloadSource::File(path) => {
                let data = std::fs::read(path).map_err(|e| {
                    ZaehlwerkError::DataUnavailable(format!("{}: {e}", path.display()))
                })?;
                let file = File::open(path).map_err(|e| {
                    ZaehlwerkError::DataUnavailable(format!("{}: {e}", path.display()))
                })?;
                Ok(SpooledPayload { data, file })
            }
            PayloadSource::Stdin => {
                let mut data = Vec::new();
                std::io::stdin()
                    .lock()
                    .read_to_end(&mut data)
                    .map_err(|e| ZaehlwerkError::DataUnavailable(format!("stdin: {e}")))?;

                let mut file = tempfile::tempfile()?;
                file.write_all(&data)?;
                file.seek(SeekFrom::Start(0))?;
                Ok(SpooledPayload { data, file })
            }
        }
    }
}

/// A spooled payload: the bytes for counting plus an open file whose
/// descriptor is attached to the real backend's stdin.
#[derive(Debug)]
pub struct SpooledPayload {
    pub data: Vec<u8>,
    file: File,
}

impl SpooledPayload {
    /// Rewind and hand out the file for the child's stdin.
    pub fn rewound_file(&mut self) -> Result<&File> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(&self.file)
    }
}
