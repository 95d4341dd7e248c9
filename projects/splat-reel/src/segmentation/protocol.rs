// Wire protocol of the segmentation sidecar
//
// Requests and responses are JSON objects tagged by `type`, one per line.
// `propagate_in_video` is answered by a stream of `masks` messages terminated
// by `end_of_stream`; every other request gets exactly one response.

use super::mask::{MaskRle, MaskSet, ObjectId};
use super::{Prompt, SessionId};
use crate::error::{PipelineError, PipelineResult};
use crate::sidecar::JsonLines;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

pub const SEGMENTER: &str = "segmenter";

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentationRequest {
    StartSession {
        resource_path: PathBuf,
    },
    ResetSession {
        session_id: SessionId,
    },
    AddPrompt {
        session_id: SessionId,
        frame_index: usize,
        prompt: Prompt,
    },
    PropagateInVideo {
        session_id: SessionId,
    },
    CloseSession {
        session_id: SessionId,
    },
    Shutdown,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentationResponse {
    SessionStarted {
        session_id: SessionId,
    },
    Ack,
    Masks {
        frame_index: usize,
        outputs: BTreeMap<ObjectId, MaskRle>,
    },
    EndOfStream,
    Error {
        message: String,
    },
}

impl SegmentationResponse {
    fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::Ack => "ack",
            Self::Masks { .. } => "masks",
            Self::EndOfStream => "end_of_stream",
            Self::Error { .. } => "error",
        }
    }
}

fn unexpected(response: SegmentationResponse, wanted: &str) -> PipelineError {
    match response {
        SegmentationResponse::Error { message } => PipelineError::sidecar(SEGMENTER, message),
        other => PipelineError::sidecar(
            SEGMENTER,
            format!("expected {wanted}, got {}", other.kind()),
        ),
    }
}

fn decode_outputs(outputs: BTreeMap<ObjectId, MaskRle>) -> PipelineResult<MaskSet> {
    outputs
        .into_iter()
        .map(|(id, rle)| Ok((id, rle.decode()?)))
        .collect()
}

fn expect_ack<R: BufRead, W: Write>(
    channel: &mut JsonLines<R, W>,
    request: &SegmentationRequest,
) -> PipelineResult<()> {
    match channel.request(request)? {
        SegmentationResponse::Ack => Ok(()),
        other => Err(unexpected(other, "ack")),
    }
}

pub fn start_session<R: BufRead, W: Write>(
    channel: &mut JsonLines<R, W>,
    resource: &Path,
) -> PipelineResult<SessionId> {
    let request = SegmentationRequest::StartSession {
        resource_path: resource.to_path_buf(),
    };
    match channel.request(&request)? {
        SegmentationResponse::SessionStarted { session_id } => Ok(session_id),
        other => Err(unexpected(other, "session_started")),
    }
}

pub fn reset_session<R: BufRead, W: Write>(
    channel: &mut JsonLines<R, W>,
    session: &SessionId,
) -> PipelineResult<()> {
    expect_ack(
        channel,
        &SegmentationRequest::ResetSession {
            session_id: session.clone(),
        },
    )
}

pub fn add_prompt<R: BufRead, W: Write>(
    channel: &mut JsonLines<R, W>,
    session: &SessionId,
    frame_index: usize,
    prompt: &Prompt,
) -> PipelineResult<MaskSet> {
    let request = SegmentationRequest::AddPrompt {
        session_id: session.clone(),
        frame_index,
        prompt: prompt.clone(),
    };
    match channel.request(&request)? {
        SegmentationResponse::Masks {
            frame_index: answered,
            outputs,
        } => {
            if answered != frame_index {
                return Err(PipelineError::sidecar(
                    SEGMENTER,
                    format!("prompted frame {frame_index}, got masks for frame {answered}"),
                ));
            }
            decode_outputs(outputs)
        }
        other => Err(unexpected(other, "masks")),
    }
}

pub fn propagate_in_video<R: BufRead, W: Write>(
    channel: &mut JsonLines<R, W>,
    session: &SessionId,
    sink: &mut dyn FnMut(usize, MaskSet) -> PipelineResult<()>,
) -> PipelineResult<()> {
    channel.send(&SegmentationRequest::PropagateInVideo {
        session_id: session.clone(),
    })?;
    loop {
        match channel.recv()? {
            SegmentationResponse::Masks {
                frame_index,
                outputs,
            } => sink(frame_index, decode_outputs(outputs)?)?,
            SegmentationResponse::EndOfStream => return Ok(()),
            other => return Err(unexpected(other, "masks or end_of_stream")),
        }
    }
}

pub fn close_session<R: BufRead, W: Write>(
    channel: &mut JsonLines<R, W>,
    session: &SessionId,
) -> PipelineResult<()> {
    expect_ack(
        channel,
        &SegmentationRequest::CloseSession {
            session_id: session.clone(),
        },
    )
}

pub fn shutdown<R: BufRead, W: Write>(channel: &mut JsonLines<R, W>) -> PipelineResult<()> {
    expect_ack(channel, &SegmentationRequest::Shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn channel(script: &str) -> JsonLines<Cursor<Vec<u8>>, Vec<u8>> {
        JsonLines::new(SEGMENTER, Cursor::new(script.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(SegmentationRequest::AddPrompt {
            session_id: "s1".to_string(),
            frame_index: 0,
            prompt: Prompt::text("cheetah"),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "add_prompt",
                "session_id": "s1",
                "frame_index": 0,
                "prompt": {"kind": "text", "text": "cheetah"}
            })
        );
        assert_eq!(
            serde_json::to_string(&SegmentationRequest::Shutdown).unwrap(),
            r#"{"type":"shutdown"}"#
        );
    }

    #[test]
    fn test_start_session_returns_sidecar_id() {
        let mut ch = channel("{\"type\":\"session_started\",\"session_id\":\"abc\"}\n");
        let id = start_session(&mut ch, Path::new("clip.mp4")).unwrap();
        assert_eq!(id, "abc");
    }

    #[test]
    fn test_add_prompt_decodes_object_masks() {
        let mut ch = channel(concat!(
            r#"{"type":"masks","frame_index":0,"outputs":{"1":{"size":[1,3],"counts":[1,2]},"4":{"size":[1,3],"counts":[3]}}}"#,
            "\n"
        ));
        let masks = add_prompt(&mut ch, &"abc".to_string(), 0, &Prompt::text("cheetah")).unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[&1].foreground_count(), 2);
        assert_eq!(masks[&4].foreground_count(), 0);
    }

    #[test]
    fn test_propagation_streams_until_end_marker() {
        let mut ch = channel(concat!(
            r#"{"type":"masks","frame_index":0,"outputs":{"1":{"size":[1,2],"counts":[0,2]}}}"#,
            "\n",
            r#"{"type":"masks","frame_index":1,"outputs":{}}"#,
            "\n",
            r#"{"type":"end_of_stream"}"#,
            "\n",
        ));
        let mut frames = Vec::new();
        propagate_in_video(&mut ch, &"abc".to_string(), &mut |index, masks| {
            frames.push((index, masks.len()));
            Ok(())
        })
        .unwrap();
        assert_eq!(frames, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_sidecar_error_message_is_surfaced() {
        let mut ch = channel("{\"type\":\"error\",\"message\":\"CUDA out of memory\"}\n");
        let err = reset_session(&mut ch, &"abc".to_string()).unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let mut ch = channel(concat!(
            r#"{"type":"masks","frame_index":0,"outputs":{}}"#,
            "\n"
        ));
        let result = propagate_in_video(&mut ch, &"abc".to_string(), &mut |_, _| Ok(()));
        assert!(matches!(result, Err(PipelineError::Sidecar { .. })));
    }
}
