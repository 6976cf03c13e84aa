//! Argument encoding that carries the sandbox settings across the re-exec.
//!
//! Frame layout, one argument per position:
//!
//! ```text
//! tinybox/v1  <rootfs>  <env count>  <env>...  <working dir>  <command> <args>...
//! ```
//!
//! The count is needed because environment entries and the working directory
//! are both free-form strings.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::DecodeError;
use crate::registry::models::ImageConfig;

/// First argument of a re-exec'd process; routes it to [`decode`] instead of the CLI.
pub const INIT_MARKER: &str = "__tinybox_init";

pub const FRAME_VERSION: &str = "tinybox/v1";

/// Everything the namespaced process needs to confine and run the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub rootfs: PathBuf,
    pub env: Vec<String>,
    pub working_dir: String,
    /// Program followed by its arguments; may be empty.
    pub command: Vec<String>,
}

/// Explicit trailing arguments win over the image's default command.
pub fn select_command(explicit: &[String], config: &ImageConfig) -> Vec<String> {
    if explicit.is_empty() {
        config.default_command()
    } else {
        explicit.to_vec()
    }
}

pub fn encode(spec: &SandboxSpec) -> Vec<String> {
    let mut frame = Vec::with_capacity(5 + spec.env.len() + spec.command.len());
    frame.push(FRAME_VERSION.to_string());
    frame.push(spec.rootfs.to_string_lossy().into_owned());
    frame.push(spec.env.len().to_string());
    frame.extend(spec.env.iter().cloned());
    frame.push(spec.working_dir.clone());
    frame.extend(spec.command.iter().cloned());
    frame
}

pub fn decode(frame: &[String]) -> Result<SandboxSpec, DecodeError> {
    let mut args = frame.iter();

    let version = args.next().ok_or(DecodeError::Missing("version tag"))?;
    if version != FRAME_VERSION {
        return Err(DecodeError::UnsupportedVersion(version.clone()));
    }

    let rootfs = args.next().ok_or(DecodeError::Missing("rootfs path"))?;
    let count = args.next().ok_or(DecodeError::Missing("environment count"))?;
    let count: usize = count
        .parse()
        .map_err(|_| DecodeError::InvalidCount(count.clone()))?;

    // the working directory must follow the environment entries
    let rest = args.as_slice();
    let Some((working_dir, command)) = rest.get(count..).and_then(|tail| tail.split_first()) else {
        return Err(DecodeError::Truncated {
            declared: count,
            available: rest.len().saturating_sub(1),
        });
    };
    let env = rest[..count].to_vec();

    Ok(SandboxSpec {
        rootfs: PathBuf::from(rootfs),
        env,
        working_dir: working_dir.clone(),
        command: command.to_vec(),
    })
}

/// Converts raw process arguments, rejecting anything that is not UTF-8.
pub fn frame_from_os_args(args: impl IntoIterator<Item = OsString>) -> Result<Vec<String>, DecodeError> {
    args.into_iter()
        .enumerate()
        .map(|(idx, arg)| arg.into_string().map_err(|_| DecodeError::NotUnicode(idx)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn spec(env: &[&str], command: &[&str]) -> SandboxSpec {
        SandboxSpec {
            rootfs: PathBuf::from("/var/lib/tinybox/images/6f1c"),
            env: strings(env),
            working_dir: "/srv".to_string(),
            command: strings(command),
        }
    }

    #[test]
    fn test_round_trip_env_sizes() {
        for env in [
            &[][..],
            &["PATH=/bin"][..],
            &["PATH=/bin", "HOME=/root", "EMPTY=", "WEIRD=a=b c"][..],
        ] {
            let original = spec(env, &["/bin/echo", "hello", "-n"]);
            assert_eq!(decode(&encode(&original)).unwrap(), original);
        }
    }

    #[test]
    fn test_layout() {
        let frame = encode(&spec(&["A=1"], &["sh", "-c", "true"]));
        assert_eq!(
            frame,
            strings(&["tinybox/v1", "/var/lib/tinybox/images/6f1c", "1", "A=1", "/srv", "sh", "-c", "true"])
        );
    }

    #[test]
    fn test_empty_command_and_working_dir() {
        let mut original = spec(&["A=1"], &[]);
        original.working_dir.clear();
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded, original);
        assert!(decoded.command.is_empty());
    }

    #[test]
    fn test_env_values_that_look_like_counts() {
        let original = spec(&["3", "/srv"], &["7"]);
        assert_eq!(decode(&encode(&original)).unwrap(), original);
    }

    #[test]
    fn test_invalid_count() {
        let frame = strings(&["tinybox/v1", "/rootfs", "two", "A=1", "B=2", "/"]);
        assert_eq!(decode(&frame), Err(DecodeError::InvalidCount("two".into())));

        let frame = strings(&["tinybox/v1", "/rootfs", "-1", "/"]);
        assert_eq!(decode(&frame), Err(DecodeError::InvalidCount("-1".into())));
    }

    #[test]
    fn test_count_exceeds_remaining() {
        let frame = strings(&["tinybox/v1", "/rootfs", "5", "A=1", "/"]);
        assert_eq!(
            decode(&frame),
            Err(DecodeError::Truncated { declared: 5, available: 1 })
        );

        // every remaining argument is env, leaving no working directory
        let frame = strings(&["tinybox/v1", "/rootfs", "2", "A=1", "B=2"]);
        assert_eq!(
            decode(&frame),
            Err(DecodeError::Truncated { declared: 2, available: 1 })
        );
        let frame = strings(&["tinybox/v1", "/rootfs", "0"]);
        assert_eq!(
            decode(&frame),
            Err(DecodeError::Truncated { declared: 0, available: 0 })
        );

        let frame = strings(&["tinybox/v1", "/rootfs", &usize::MAX.to_string()]);
        assert!(matches!(decode(&frame), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_missing_fields_and_version() {
        assert_eq!(decode(&[]), Err(DecodeError::Missing("version tag")));
        assert_eq!(
            decode(&strings(&["tinybox/v1"])),
            Err(DecodeError::Missing("rootfs path"))
        );
        assert_eq!(
            decode(&strings(&["tinybox/v1", "/rootfs"])),
            Err(DecodeError::Missing("environment count"))
        );
        assert_eq!(
            decode(&strings(&["/rootfs", "0", "/"])),
            Err(DecodeError::UnsupportedVersion("/rootfs".into()))
        );
    }

    #[test]
    fn test_select_command() {
        let config = ImageConfig {
            cmd: strings(&["/bin/sh"]),
            ..Default::default()
        };
        assert_eq!(select_command(&[], &config), strings(&["/bin/sh"]));
        assert_eq!(
            select_command(&strings(&["ls", "-l"]), &config),
            strings(&["ls", "-l"])
        );
        assert!(select_command(&[], &ImageConfig::default()).is_empty());
    }

    #[test]
    fn test_frame_from_os_args() {
        let args = vec![OsString::from("tinybox/v1"), OsString::from("/rootfs")];
        assert_eq!(frame_from_os_args(args).unwrap(), strings(&["tinybox/v1", "/rootfs"]));

        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStringExt;
            let args = vec![OsString::from("ok"), OsString::from_vec(vec![0xff, 0xfe])];
            assert_eq!(frame_from_os_args(args), Err(DecodeError::NotUnicode(1)));
        }
    }
}
