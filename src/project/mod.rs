pub mod registrar;

pub use registrar::{FolderProvisioner, NewProjectRequest, ProjectRegistrar, Registration, UploadSlot};
