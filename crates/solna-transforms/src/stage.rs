#![forbid(unsafe_code)]

//! Lifecycle enforcement around a single transform.

use crate::transform::{DataType, Operation, Transform, TransformIo, TransformStatus};
use solna_core::{Error, Outcome, Result};
use solna_keys::{Key, KeyRequirement};

/// A transform together with its buffers and lifecycle state.
///
/// Every call is checked against the status before it reaches the
/// transform: `execute` before `initialize` is rejected, as is `execute`
/// with fresh input after the stage has finished. Dropping a stage
/// finalizes it.
#[derive(Debug)]
pub struct Stage<'d> {
    transform: Box<dyn Transform>,
    operation: Option<Operation>,
    status: TransformStatus,
    key_set: bool,
    finalized: bool,
    pub(crate) io: TransformIo<'d>,
}

impl<'d> Stage<'d> {
    pub fn new(transform: Box<dyn Transform>) -> Self {
        Self {
            transform,
            operation: None,
            status: TransformStatus::None,
            key_set: false,
            finalized: false,
            io: TransformIo::default(),
        }
    }

    pub fn transform(&self) -> &dyn Transform {
        self.transform.as_ref()
    }

    pub fn name(&self) -> &'static str {
        self.transform.id().name
    }

    pub fn status(&self) -> TransformStatus {
        self.status
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn input_type(&self) -> DataType {
        self.transform.input_type()
    }

    pub fn output_type(&self) -> DataType {
        self.transform.output_type()
    }

    pub fn io(&self) -> &TransformIo<'d> {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut TransformIo<'d> {
        &mut self.io
    }

    pub fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        if self.operation.is_some() {
            return Err(Error::InvalidStatus(format!(
                "{}: parameters read after initialize",
                self.name()
            )));
        }
        self.transform.read_node(node)
    }

    pub fn initialize(&mut self, op: Operation) -> Result<()> {
        if self.operation.is_some() || self.finalized {
            return Err(Error::InvalidStatus(format!(
                "{}: initialized twice",
                self.name()
            )));
        }
        self.transform.initialize(op)?;
        self.operation = Some(op);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.operation.is_some()
    }

    /// The key the transform needs for its operation.
    pub fn key_requirement(&self) -> Result<Option<KeyRequirement>> {
        if self.operation.is_none() {
            return Err(Error::InvalidStatus(format!(
                "{}: key requirement before initialize",
                self.name()
            )));
        }
        Ok(self.transform.key_requirement())
    }

    /// Bind a key after re-validating it against the requirement.
    pub fn set_key(&mut self, key: &Key) -> Result<()> {
        let req = self.key_requirement()?.ok_or_else(|| {
            Error::InvalidTransform(format!("{} does not take a key", self.name()))
        })?;
        if self.status != TransformStatus::None {
            return Err(Error::InvalidStatus(format!(
                "{}: key set after processing started",
                self.name()
            )));
        }
        req.check(key)?;
        self.transform.set_key(key)?;
        self.key_set = true;
        Ok(())
    }

    pub fn has_key(&self) -> bool {
        self.key_set
    }

    pub fn execute(&mut self, last: bool) -> Result<()> {
        if self.operation.is_none() {
            return Err(Error::InvalidStatus(format!(
                "{}: execute before initialize",
                self.name()
            )));
        }
        if self.status >= TransformStatus::Finished {
            if self.io.has_pending_input() {
                return Err(Error::InvalidStatus(format!(
                    "{}: input after the transform finished",
                    self.name()
                )));
            }
            return Ok(());
        }
        if self.transform.key_requirement().is_some() && !self.key_set {
            return Err(Error::MissingKey(format!("{}: no key set", self.name())));
        }

        self.status = TransformStatus::Working;
        let consumed = self.io.input.len();
        self.transform.execute(&mut self.io, last)?;
        log::trace!(
            "{}: consumed {consumed} bytes, output {} bytes{}",
            self.name(),
            self.io.output.len(),
            if last { " (last)" } else { "" }
        );
        if last {
            self.status = TransformStatus::Finished;
        }
        Ok(())
    }

    /// Compare the finished result with `expected`.
    pub fn verify(&mut self, expected: &[u8]) -> Result<Outcome> {
        if self.status != TransformStatus::Finished {
            return Err(Error::InvalidStatus(format!(
                "{}: verify in status {:?}",
                self.name(),
                self.status
            )));
        }
        let ok = self.transform.verify(expected)?;
        self.status = if ok {
            TransformStatus::Ok
        } else {
            log::warn!("{}: verification failed", self.name());
            TransformStatus::Fail
        };
        Ok(Outcome::from_bool(ok))
    }

    /// Release transform state and buffers. Idempotent.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.transform.finalize();
        self.io.clear();
        self.finalized = true;
    }
}

impl Drop for Stage<'_> {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{TransformId, TransformUsage};
    use solna_keys::{KeyData, KeyDataId, KeyType, KeyUsage};
    use std::cell::Cell;
    use std::rc::Rc;

    static ECHO: TransformId = TransformId {
        name: "echo",
        href: "urn:test:echo",
        usage: TransformUsage::Generic,
    };

    /// Copies input to output; `verify` compares against it.
    #[derive(Default)]
    struct Echo {
        finalized: Rc<Cell<u32>>,
        needs_key: bool,
    }

    impl Transform for Echo {
        fn id(&self) -> &'static TransformId {
            &ECHO
        }
        fn input_type(&self) -> DataType {
            DataType::Binary
        }
        fn output_type(&self) -> DataType {
            DataType::Binary
        }
        fn initialize(&mut self, _op: Operation) -> Result<()> {
            Ok(())
        }
        fn key_requirement(&self) -> Option<KeyRequirement> {
            self.needs_key
                .then(|| KeyRequirement::new(KeyDataId::Hmac, KeyType::Symmetric, KeyUsage::Sign))
        }
        fn set_key(&mut self, _key: &Key) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, io: &mut TransformIo<'_>, _last: bool) -> Result<()> {
            let data = io.input.take();
            io.output.append(&data)
        }
        fn verify(&mut self, expected: &[u8]) -> Result<bool> {
            Ok(expected == b"abc")
        }
        fn finalize(&mut self) {
            self.finalized.set(self.finalized.get() + 1);
        }
    }

    #[test]
    fn test_execute_before_initialize() {
        let mut stage = Stage::new(Box::new(Echo::default()));
        let err = stage.execute(true).unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(_)));
        assert_eq!(stage.status(), TransformStatus::None);
    }

    #[test]
    fn test_status_moves_forward() {
        let mut stage = Stage::new(Box::new(Echo::default()));
        stage.initialize(Operation::Verify).unwrap();
        stage.io_mut().input.append(b"ab").unwrap();
        stage.execute(false).unwrap();
        assert_eq!(stage.status(), TransformStatus::Working);
        stage.io_mut().input.append(b"c").unwrap();
        stage.execute(true).unwrap();
        assert_eq!(stage.status(), TransformStatus::Finished);
        assert_eq!(stage.io().output.as_slice(), b"abc");

        // Finished with nothing pending is a no-op.
        stage.execute(true).unwrap();

        assert_eq!(stage.verify(b"abc").unwrap(), Outcome::Succeeded);
        assert_eq!(stage.status(), TransformStatus::Ok);
        assert!(matches!(stage.verify(b"abc"), Err(Error::InvalidStatus(_))));
    }

    #[test]
    fn test_input_after_finish_rejected() {
        let mut stage = Stage::new(Box::new(Echo::default()));
        stage.initialize(Operation::Sign).unwrap();
        stage.execute(true).unwrap();
        stage.io_mut().input.append(b"late").unwrap();
        assert!(matches!(stage.execute(true), Err(Error::InvalidStatus(_))));
    }

    #[test]
    fn test_verify_mismatch_is_not_an_error() {
        let mut stage = Stage::new(Box::new(Echo::default()));
        stage.initialize(Operation::Verify).unwrap();
        stage.execute(true).unwrap();
        assert_eq!(stage.verify(b"other").unwrap(), Outcome::Failed);
        assert_eq!(stage.status(), TransformStatus::Fail);
    }

    #[test]
    fn test_key_is_validated_before_binding() {
        let echo = Echo {
            needs_key: true,
            ..Echo::default()
        };
        let mut stage = Stage::new(Box::new(echo));
        let hmac = Key::new(KeyData::Hmac(b"k".to_vec()), KeyUsage::Any);
        assert!(matches!(stage.set_key(&hmac), Err(Error::InvalidStatus(_))));
        stage.initialize(Operation::Sign).unwrap();
        assert!(matches!(stage.execute(true), Err(Error::MissingKey(_))));

        let aes = Key::new(KeyData::Aes(vec![0; 16]), KeyUsage::Any);
        assert!(matches!(stage.set_key(&aes), Err(Error::InvalidKeyData(_))));
        let verify_only = hmac.clone().with_usage(KeyUsage::Verify);
        assert!(matches!(
            stage.set_key(&verify_only),
            Err(Error::KeyUsageMismatch(_))
        ));
        stage.set_key(&hmac).unwrap();
        stage.execute(true).unwrap();
    }

    #[test]
    fn test_finalize_is_idempotent_and_runs_on_drop() {
        let counter = Rc::new(Cell::new(0));
        let echo = Echo {
            finalized: counter.clone(),
            ..Echo::default()
        };
        let mut stage = Stage::new(Box::new(echo));
        stage.finalize();
        stage.finalize();
        assert_eq!(counter.get(), 1);
        drop(stage);
        assert_eq!(counter.get(), 1);

        let echo = Echo {
            finalized: counter.clone(),
            ..Echo::default()
        };
        drop(Stage::new(Box::new(echo)));
        assert_eq!(counter.get(), 2);
    }
}
