//! Front-end checks for synthesis programs.
//!
//! Programs are checked with naga before any GPU object is created, so a
//! rejected program never reaches the device and errors carry a stage and a
//! line number within the user's code.

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Module, Scalar, TypeInner, VectorSize};

use crate::synth::template::USER_ENTRY_POINT;
use crate::synth::{CompileError, CompileStage, ProgramSource};

/// Run the parse, link and validate stages on `program`.
pub fn check_program(program: &ProgramSource) -> Result<(), CompileError> {
    let user = parse_user_code(&program.user_code)?;
    check_entry_point(&user)?;
    validate_wrapped(program)
}

fn parse_user_code(code: &str) -> Result<Module, CompileError> {
    naga::front::wgsl::parse_str(code).map_err(|e| {
        let err = CompileError::new(CompileStage::Parse, e.message());
        match e.location(code) {
            Some(loc) => err.at_line(loc.line_number),
            None => err,
        }
    })
}

fn check_entry_point(module: &Module) -> Result<(), CompileError> {
    let signature = format!("fn {}(time: f32) -> vec2<f32>", USER_ENTRY_POINT);

    let (_, function) = module
        .functions
        .iter()
        .find(|(_, f)| f.name.as_deref() == Some(USER_ENTRY_POINT))
        .ok_or_else(|| {
            CompileError::new(CompileStage::Link, format!("missing `{}`", signature))
        })?;

    let takes_time = function.arguments.len() == 1
        && module.types[function.arguments[0].ty].inner == TypeInner::Scalar(Scalar::F32);
    let returns_stereo = function.result.as_ref().is_some_and(|r| {
        module.types[r.ty].inner
            == TypeInner::Vector {
                size: VectorSize::Bi,
                scalar: Scalar::F32,
            }
    });

    if !(takes_time && returns_stereo) {
        return Err(CompileError::new(
            CompileStage::Link,
            format!("`{}` must have signature `{}`", USER_ENTRY_POINT, signature),
        ));
    }
    Ok(())
}

fn validate_wrapped(program: &ProgramSource) -> Result<(), CompileError> {
    let wrapped = &program.wrapped;

    // User code that parses alone can still clash with the boilerplate.
    let module = naga::front::wgsl::parse_str(wrapped).map_err(|e| {
        let err = CompileError::new(CompileStage::Validate, e.message());
        with_user_line(err, program, e.location(wrapped).map(|l| l.line_number))
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|e| {
            let err = CompileError::new(CompileStage::Validate, error_chain(e.as_inner()));
            with_user_line(err, program, e.location(wrapped).map(|l| l.line_number))
        })?;

    Ok(())
}

/// Attach a line number if `wrapped_line` falls inside the user's code.
fn with_user_line(
    err: CompileError,
    program: &ProgramSource,
    wrapped_line: Option<u32>,
) -> CompileError {
    let offset = program.user_line_offset();
    let user_lines = program.user_code.lines().count().max(1) as u32;
    match wrapped_line {
        Some(line) if line > offset && line <= offset + user_lines => err.at_line(line - offset),
        _ => err,
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(code: &str) -> Result<(), CompileError> {
        check_program(&ProgramSource::new(code))
    }

    #[test]
    fn test_valid_program() {
        let code = "fn main_sound(time: f32) -> vec2<f32> {\n    let v = sin(6.2831853 * 440.0 * time);\n    return vec2<f32>(v, v);\n}";
        assert!(check(code).is_ok());
    }

    #[test]
    fn test_helper_functions_allowed() {
        let code = "fn tone(f: f32, t: f32) -> f32 {\n    return sin(6.2831853 * f * t);\n}\n\nfn main_sound(time: f32) -> vec2<f32> {\n    return vec2<f32>(tone(220.0, time), tone(330.0, time));\n}";
        assert!(check(code).is_ok());
    }

    #[test]
    fn test_syntax_error_reports_user_line() {
        let code = "fn main_sound(time: f32) -> vec2<f32> {\n    let v = ;\n    return vec2<f32>(v, v);\n}";
        let err = check(code).unwrap_err();
        assert_eq!(err.stage, CompileStage::Parse);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_missing_entry_point() {
        let err = check("fn other(time: f32) -> vec2<f32> { return vec2<f32>(0.0); }").unwrap_err();
        assert_eq!(err.stage, CompileStage::Link);
        assert!(err.message.contains("main_sound"));
    }

    #[test]
    fn test_wrong_signature() {
        let err = check("fn main_sound(time: f32) -> f32 { return 0.0; }").unwrap_err();
        assert_eq!(err.stage, CompileStage::Link);
    }

    #[test]
    fn test_type_error_is_validation_failure() {
        let code = "fn main_sound(time: f32) -> vec2<f32> {\n    return vec2<f32>(time, true);\n}";
        let err = check(code).unwrap_err();
        assert!(matches!(
            err.stage,
            CompileStage::Parse | CompileStage::Validate
        ));
    }

    #[test]
    fn test_clash_with_boilerplate_is_validation_failure() {
        let code = "var<private> samples: f32;\nfn main_sound(time: f32) -> vec2<f32> {\n    return vec2<f32>(0.0);\n}";
        let err = check(code).unwrap_err();
        assert_eq!(err.stage, CompileStage::Validate);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("type mismatch")]
    struct Inner;

    #[derive(Debug, thiserror::Error)]
    #[error("in function main_sound")]
    struct Outer(#[source] Inner);

    #[test]
    fn test_error_chain_joins_causes() {
        assert_eq!(error_chain(&Outer(Inner)), "in function main_sound: type mismatch");
        assert_eq!(error_chain(&Inner), "type mismatch");
    }
}
