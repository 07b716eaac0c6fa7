// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

const PRIORITY_ENV: &str = "FILEPLAY_THREAD_PRIORITY";
const DISABLE_RT_ENV: &str = "FILEPLAY_DISABLE_RT_AUDIO";

/// Priority for the output callback thread when FILEPLAY_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

/// Priority for the output callback thread, read once when the stream is
/// built so the callback never touches the environment.
pub fn callback_thread_priority() -> Option<ThreadPriorityValue> {
    let priority = std::env::var(PRIORITY_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_CALLBACK_THREAD_PRIORITY);
    ThreadPriorityValue::try_from(priority).ok()
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Whether to try SCHED_FIFO for the output callback thread. Opt out with
/// FILEPLAY_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag(DISABLE_RT_ENV)
}

/// Raises the calling thread's priority the first time it is called for a
/// given `priority_set` flag. Failures are logged, never fatal.
pub fn configure_audio_thread_priority(
    priority: Option<ThreadPriorityValue>,
    rt_audio: bool,
    priority_set: &mut bool,
) {
    if *priority_set {
        return;
    }
    *priority_set = true;

    let Some(priority) = priority else {
        return;
    };
    let tp = ThreadPriority::Crossplatform(priority);
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        match set_thread_priority_and_policy(
            thread_native_id(),
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => info!("Enabled RT SCHED_FIFO for output callback thread"),
            Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for output callback thread"),
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn with_env<F: FnOnce()>(name: &str, value: Option<&str>, f: F) {
        match value {
            Some(value) => std::env::set_var(name, value),
            None => std::env::remove_var(name),
        }
        f();
        std::env::remove_var(name);
    }

    #[test]
    #[serial]
    fn test_priority_from_env() {
        with_env(PRIORITY_ENV, Some("42"), || {
            assert_eq!(
                callback_thread_priority(),
                ThreadPriorityValue::try_from(42u8).ok()
            );
        });
    }

    #[test]
    #[serial]
    fn test_priority_default_on_bad_value() {
        let default = ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).ok();
        with_env(PRIORITY_ENV, None, || {
            assert_eq!(callback_thread_priority(), default);
        });
        with_env(PRIORITY_ENV, Some("150"), || {
            assert_eq!(callback_thread_priority(), default);
        });
        with_env(PRIORITY_ENV, Some("loud"), || {
            assert_eq!(callback_thread_priority(), default);
        });
    }

    #[test]
    #[serial]
    fn test_rt_audio_opt_out() {
        with_env(DISABLE_RT_ENV, None, || assert!(rt_audio_enabled()));
        with_env(DISABLE_RT_ENV, Some("1"), || assert!(!rt_audio_enabled()));
        with_env(DISABLE_RT_ENV, Some("Yes"), || assert!(!rt_audio_enabled()));
        with_env(DISABLE_RT_ENV, Some("0"), || assert!(rt_audio_enabled()));
    }

    #[test]
    fn test_configure_runs_once() {
        let mut priority_set = false;
        configure_audio_thread_priority(None, false, &mut priority_set);
        assert!(priority_set);
        // A second call is a no-op.
        configure_audio_thread_priority(None, false, &mut priority_set);
        assert!(priority_set);
    }
}
