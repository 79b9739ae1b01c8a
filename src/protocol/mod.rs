/*!
 * Storage protocols for clouddeck
 */

pub mod s3;
