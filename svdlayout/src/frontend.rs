//! Front-ends turning hardware description files into [`crate::model`] types

pub(crate) mod svd_xml;
